use tracing::warn;

use crate::types::SlotTransform;

/// Round-robin allocator over the player spawn points.
#[derive(Clone, Debug)]
pub struct SpawnPointRing {
    points: Vec<SlotTransform>,
    cursor: usize,
}

impl SpawnPointRing {
    pub fn new(points: Vec<SlotTransform>) -> Self {
        Self { points, cursor: 0 }
    }

    pub fn next_point(&mut self) -> Option<SlotTransform> {
        if self.points.is_empty() {
            warn!("no spawn points defined");
            return None;
        }
        let point = self.points[self.cursor];
        self.cursor = (self.cursor + 1) % self.points.len();
        Some(point)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_around() {
        let mut ring = SpawnPointRing::new(vec![
            SlotTransform::at(0.0, 0.0, 0.0),
            SlotTransform::at(1.0, 0.0, 0.0),
            SlotTransform::at(2.0, 0.0, 0.0),
        ]);
        let xs: Vec<f32> = (0..7)
            .map(|_| ring.next_point().expect("ring has points").position[0])
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0]);

        ring.rewind();
        assert_eq!(ring.next_point().map(|point| point.position[0]), Some(0.0));
    }

    #[test]
    fn empty_ring_yields_nothing() {
        let mut ring = SpawnPointRing::new(Vec::new());
        assert!(ring.is_empty());
        assert_eq!(ring.next_point(), None);
    }
}
