use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::color_catalog::ColorCatalog;
use crate::constants::{route_name, DEFAULT_ROUTE_COLOR_IDS, LEVEL_COUNT, ROUTE_COUNT};
use crate::puzzle_module::{ModuleInit, ModuleKey, PuzzleModule};
use crate::rng::Rng;
use crate::types::{Authority, ColorIdentity, SlotTransform};

mod placement;
mod spawn_ring;

pub use self::placement::{
    decode_records, encode_records, PlacementRecord, PlacementTable, RoutePlacement, WireError,
};
pub use self::spawn_ring::SpawnPointRing;

const PUZZLE_GROUPS_PER_BUILD: usize = ROUTE_COUNT;

#[derive(Clone, Debug, Deserialize)]
pub struct PuzzleGroup {
    pub name: String,
    pub levels: Vec<String>,
}

/// Placeholder slots of one route, nearest to the center first.
#[derive(Clone, Debug, Deserialize)]
pub struct RouteTemplate {
    pub name: String,
    pub slots: Vec<SlotTransform>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorldLayout {
    pub routes: Vec<RouteTemplate>,
    #[serde(rename = "puzzleGroups")]
    pub puzzle_groups: Vec<PuzzleGroup>,
    #[serde(rename = "spawnPoints")]
    pub spawn_points: Vec<SlotTransform>,
    pub center: SlotTransform,
}

impl WorldLayout {
    /// Four routes leaving the center at 90 degree steps, six puzzle groups.
    pub fn builtin() -> Self {
        let routes = (0..ROUTE_COUNT)
            .map(|route_index| {
                let yaw = route_index as f32 * 90.0;
                RouteTemplate {
                    name: route_name(route_index).to_string(),
                    slots: (0..LEVEL_COUNT)
                        .map(|level_index| along(yaw, 12.0 + 10.0 * level_index as f32))
                        .collect(),
                }
            })
            .collect();
        let spawn_points = (0..ROUTE_COUNT)
            .map(|route_index| {
                let yaw = route_index as f32 * 90.0;
                along(yaw, 55.0).with_yaw((yaw + 180.0) % 360.0)
            })
            .collect();
        let puzzle_groups = ["platforms", "maze", "levers", "orbit", "walls", "pressure"]
            .iter()
            .map(|name| PuzzleGroup {
                name: name.to_string(),
                levels: (1..=LEVEL_COUNT).map(|level| format!("{name}-{level}")).collect(),
            })
            .collect();
        Self {
            routes,
            puzzle_groups,
            spawn_points,
            center: SlotTransform::at(0.0, 0.0, 0.0),
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.routes.len() != ROUTE_COUNT {
            return Err(BuildError::RouteTemplates {
                found: self.routes.len(),
            });
        }
        if let Some(route) = self
            .routes
            .iter()
            .find(|route| route.slots.len() != LEVEL_COUNT)
        {
            return Err(BuildError::RouteSlots {
                route: route.name.clone(),
                found: route.slots.len(),
            });
        }
        if let Some(group) = self
            .puzzle_groups
            .iter()
            .find(|group| group.levels.len() != LEVEL_COUNT)
        {
            return Err(BuildError::MalformedPuzzleGroup {
                group: group.name.clone(),
                levels: group.levels.len(),
            });
        }
        if self.puzzle_groups.len() < PUZZLE_GROUPS_PER_BUILD {
            return Err(BuildError::InsufficientPuzzleGroups {
                available: self.puzzle_groups.len(),
                required: PUZZLE_GROUPS_PER_BUILD,
            });
        }
        Ok(())
    }
}

fn along(yaw_degrees: f32, distance: f32) -> SlotTransform {
    let radians = yaw_degrees.to_radians();
    SlotTransform::at(radians.sin() * distance, 0.0, radians.cos() * distance)
        .with_yaw(yaw_degrees)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    NotAuthoritative,
    RouteTemplates { found: usize },
    RouteSlots { route: String, found: usize },
    MalformedPuzzleGroup { group: String, levels: usize },
    InsufficientPuzzleGroups { available: usize, required: usize },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NotAuthoritative => write!(f, "only the server may build the world"),
            BuildError::RouteTemplates { found } => {
                write!(f, "expected {ROUTE_COUNT} route templates, found {found}")
            }
            BuildError::RouteSlots { route, found } => write!(
                f,
                "route '{route}' has {found} module slots, expected {LEVEL_COUNT}"
            ),
            BuildError::MalformedPuzzleGroup { group, levels } => write!(
                f,
                "puzzle group '{group}' has {levels} levels, expected {LEVEL_COUNT}"
            ),
            BuildError::InsufficientPuzzleGroups {
                available,
                required,
            } => write!(
                f,
                "{available} puzzle groups available, {required} required"
            ),
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    AlreadyBuilt,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorldEvent {
    ModuleInitialized(ModuleInit),
    TemplatesDeactivated,
    PlacementBroadcast(PlacementTable),
}

/// Puzzle modules keyed by pool position. Shared by the server world and the
/// client mirror so both apply a placement table the same way.
#[derive(Debug, Default)]
pub struct ModuleSet {
    modules: BTreeMap<ModuleKey, PuzzleModule>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places, colors and initializes every module named by the table. Only
    /// absolute state is written, so applying the same table again changes
    /// nothing and emits no initialize signals.
    pub fn apply_table(
        &mut self,
        table: &PlacementTable,
        routes: &[RouteTemplate],
        neutral_color_id: &str,
        authority: Authority,
    ) -> Vec<ModuleInit> {
        let mut inits = Vec::new();
        for placement in table.placements() {
            let Some(slot) = routes
                .get(placement.route_index)
                .and_then(|route| route.slots.get(placement.level_index))
                .copied()
            else {
                warn!(
                    route = placement.route_index,
                    level = placement.level_index,
                    "placement has no matching route slot"
                );
                continue;
            };
            let key = ModuleKey::new(placement.puzzle_index, placement.level_index);
            let module = self
                .modules
                .entry(key)
                .or_insert_with(|| PuzzleModule::new(key, neutral_color_id));
            module.place(placement.route_index, slot);
            match authority {
                Authority::Server => {
                    module.assign_color(authority, &placement.color.id);
                }
                Authority::Client(_) => {
                    let next_version = module.color_version() + 1;
                    module.apply_remote_color(&placement.color.id, next_version);
                }
            }
            if let Some(init) = module.initialize() {
                inits.push(init);
            }
        }
        inits
    }

    pub fn get(&self, key: ModuleKey) -> Option<&PuzzleModule> {
        self.modules.get(&key)
    }

    pub fn get_mut(&mut self, key: ModuleKey) -> Option<&mut PuzzleModule> {
        self.modules.get_mut(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PuzzleModule> {
        self.modules.values()
    }

    pub fn active_count(&self) -> usize {
        self.modules.values().filter(|module| module.is_active()).count()
    }

    pub fn reset_all(&mut self, authority: Authority, neutral_color_id: &str) {
        for module in self.modules.values_mut() {
            module.reset(authority, neutral_color_id);
        }
    }
}

/// Server-side world assembly: route/level placement of puzzle modules and the
/// player spawn ring.
#[derive(Debug)]
pub struct WorldBuilder {
    layout: WorldLayout,
    neutral: ColorIdentity,
    default_route_colors: Vec<ColorIdentity>,
    modules: ModuleSet,
    table: Option<PlacementTable>,
    templates_active: bool,
    spawn_ring: SpawnPointRing,
    events: Vec<WorldEvent>,
}

impl WorldBuilder {
    pub fn new(layout: WorldLayout, catalog: &ColorCatalog) -> Self {
        let spawn_ring = SpawnPointRing::new(layout.spawn_points.clone());
        let default_route_colors = DEFAULT_ROUTE_COLOR_IDS
            .iter()
            .map(|id| catalog.find(id).unwrap_or(catalog.neutral()).clone())
            .collect();
        Self {
            layout,
            neutral: catalog.neutral().clone(),
            default_route_colors,
            modules: ModuleSet::new(),
            table: None,
            templates_active: true,
            spawn_ring,
            events: Vec::new(),
        }
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    pub fn placement_table(&self) -> Option<&PlacementTable> {
        self.table.as_ref()
    }

    pub fn is_built(&self) -> bool {
        self.table.is_some()
    }

    pub fn templates_active(&self) -> bool {
        self.templates_active
    }

    pub fn next_spawn_point(&mut self) -> Option<SlotTransform> {
        self.spawn_ring.next_point()
    }

    pub fn has_spawn_points(&self) -> bool {
        !self.spawn_ring.is_empty()
    }

    /// Pads or trims the supplied route colors to exactly one per route.
    pub fn resolve_route_colors(&self, supplied: &[ColorIdentity]) -> Vec<ColorIdentity> {
        if supplied.is_empty() {
            return self.default_route_colors.clone();
        }
        let mut colors: Vec<ColorIdentity> = supplied.iter().take(ROUTE_COUNT).cloned().collect();
        while colors.len() < ROUTE_COUNT {
            colors.push(self.neutral.clone());
        }
        colors
    }

    /// Assigns four puzzle groups to the routes, one level per slot, applies
    /// the result locally and queues the broadcast. Runs at most once until
    /// `reset`.
    pub fn build_world(
        &mut self,
        authority: Authority,
        route_colors: &[ColorIdentity],
        rng: &mut Rng,
    ) -> Result<BuildOutcome, BuildError> {
        if !authority.is_server() {
            warn!(?authority, "world build rejected: caller is not the server");
            return Err(BuildError::NotAuthoritative);
        }
        if self.table.is_some() {
            debug!("world already built; ignoring build request");
            return Ok(BuildOutcome::AlreadyBuilt);
        }
        if let Err(err) = self.layout.validate() {
            error!(%err, "world build aborted");
            return Err(err);
        }

        let colors = self.resolve_route_colors(route_colors);
        let selected = rng.sample_indices(self.layout.puzzle_groups.len(), PUZZLE_GROUPS_PER_BUILD);

        let mut placements = Vec::with_capacity(ROUTE_COUNT * LEVEL_COUNT);
        for level_index in 0..LEVEL_COUNT {
            let mut routes: Vec<usize> = (0..ROUTE_COUNT).collect();
            rng.shuffle(&mut routes);
            for (slot, puzzle_index) in selected.iter().enumerate() {
                let route_index = routes[slot];
                placements.push(RoutePlacement {
                    puzzle_index: *puzzle_index,
                    route_index,
                    level_index,
                    color: colors[route_index].clone(),
                });
            }
        }
        let table = PlacementTable::from_placements(placements);

        let inits = self.modules.apply_table(
            &table,
            &self.layout.routes,
            &self.neutral.id,
            Authority::Server,
        );
        self.events
            .extend(inits.into_iter().map(WorldEvent::ModuleInitialized));
        self.templates_active = false;
        self.events.push(WorldEvent::TemplatesDeactivated);

        let group_names: Vec<&str> = selected
            .iter()
            .map(|index| self.layout.puzzle_groups[*index].name.as_str())
            .collect();
        let route_color_ids: Vec<&str> = colors.iter().map(|color| color.id.as_str()).collect();
        info!(groups = ?group_names, routes = ?route_color_ids, "world built");
        self.table = Some(table.clone());
        self.events.push(WorldEvent::PlacementBroadcast(table));
        Ok(BuildOutcome::Built)
    }

    /// Clears the placement so a later match can rebuild from scratch.
    pub fn reset(&mut self, authority: Authority) {
        if !authority.is_server() {
            warn!(?authority, "world reset rejected: caller is not the server");
            return;
        }
        self.modules.reset_all(authority, &self.neutral.id);
        self.table = None;
        self.templates_active = true;
        self.spawn_ring.rewind();
        self.events.clear();
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn make_builder(layout: WorldLayout) -> (WorldBuilder, ColorCatalog) {
        let catalog = ColorCatalog::builtin();
        (WorldBuilder::new(layout, &catalog), catalog)
    }

    fn colors(catalog: &ColorCatalog, ids: &[&str]) -> Vec<ColorIdentity> {
        ids.iter()
            .map(|id| catalog.find(id).expect("palette color").clone())
            .collect()
    }

    #[test]
    fn builtin_layout_is_valid() {
        assert_eq!(WorldLayout::builtin().validate(), Ok(()));
    }

    #[test]
    fn builtin_route_names_match_their_heading() {
        let layout = WorldLayout::builtin();
        let first_slot = |name: &str| {
            layout
                .routes
                .iter()
                .find(|route| route.name == name)
                .map(|route| route.slots[0].position)
                .expect("route exists")
        };
        let [x, _, z] = first_slot("north");
        assert!(z > 0.0 && x.abs() < 1e-3);
        let [x, _, z] = first_slot("east");
        assert!(x > 0.0 && z.abs() < 1e-3);
        let [x, _, z] = first_slot("south");
        assert!(z < 0.0 && x.abs() < 1e-3);
        let [x, _, z] = first_slot("west");
        assert!(x < 0.0 && z.abs() < 1e-3);
    }

    #[test]
    fn every_slot_gets_exactly_one_module() {
        for seed in 0..50u32 {
            let (mut builder, catalog) = make_builder(WorldLayout::builtin());
            let route_colors = colors(&catalog, &["red", "blue", "green", "yellow"]);
            builder
                .build_world(Authority::Server, &route_colors, &mut Rng::new(seed))
                .expect("build succeeds");
            let table = builder.placement_table().expect("table recorded");

            assert_eq!(table.len(), ROUTE_COUNT * LEVEL_COUNT);
            for route_index in 0..ROUTE_COUNT {
                for level_index in 0..LEVEL_COUNT {
                    assert!(table.get(route_index, level_index).is_some());
                }
            }
            let selected: BTreeSet<usize> =
                table.for_level(0).map(|placement| placement.puzzle_index).collect();
            assert_eq!(selected.len(), ROUTE_COUNT);
            for level_index in 0..LEVEL_COUNT {
                let puzzles: BTreeSet<usize> = table
                    .for_level(level_index)
                    .map(|placement| placement.puzzle_index)
                    .collect();
                assert_eq!(puzzles, selected, "level {level_index} is a permutation");
            }
        }
    }

    #[test]
    fn each_route_carries_its_supplied_color() {
        let (mut builder, catalog) = make_builder(WorldLayout::builtin());
        let route_colors = colors(&catalog, &["purple", "orange"]);
        builder
            .build_world(Authority::Server, &route_colors, &mut Rng::new(5))
            .expect("build succeeds");
        let table = builder.placement_table().expect("table recorded");

        let expected = ["purple", "orange", "white", "white"];
        for (route_index, color_id) in expected.iter().enumerate() {
            let route: Vec<&RoutePlacement> = table.for_route(route_index).collect();
            assert_eq!(route.len(), LEVEL_COUNT);
            assert!(route.iter().all(|placement| placement.color.id == *color_id));
        }
    }

    #[test]
    fn empty_route_colors_fall_back_to_defaults() {
        let (builder, _) = make_builder(WorldLayout::builtin());
        let resolved: Vec<String> = builder
            .resolve_route_colors(&[])
            .into_iter()
            .map(|color| color.id)
            .collect();
        assert_eq!(resolved, vec!["yellow", "blue", "red", "green"]);
    }

    #[test]
    fn second_build_is_a_no_op() {
        let (mut builder, catalog) = make_builder(WorldLayout::builtin());
        let route_colors = colors(&catalog, &["red"]);
        let mut rng = Rng::new(77);
        assert_eq!(
            builder.build_world(Authority::Server, &route_colors, &mut rng),
            Ok(BuildOutcome::Built)
        );
        let first = builder.placement_table().cloned();
        let broadcasts = builder
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, WorldEvent::PlacementBroadcast(_)))
            .count();
        assert_eq!(broadcasts, 1);

        assert_eq!(
            builder.build_world(Authority::Server, &route_colors, &mut rng),
            Ok(BuildOutcome::AlreadyBuilt)
        );
        assert_eq!(builder.placement_table().cloned(), first);
        assert!(builder.drain_events().is_empty());
    }

    #[test]
    fn three_groups_abort_without_table_or_broadcast() {
        let mut layout = WorldLayout::builtin();
        layout.puzzle_groups.truncate(3);
        let (mut builder, catalog) = make_builder(layout);
        let result = builder.build_world(
            Authority::Server,
            &colors(&catalog, &["red"]),
            &mut Rng::new(1),
        );
        assert_eq!(
            result,
            Err(BuildError::InsufficientPuzzleGroups {
                available: 3,
                required: 4
            })
        );
        assert!(builder.placement_table().is_none());
        assert!(builder.drain_events().is_empty());
        assert!(builder.templates_active());
        assert_eq!(builder.modules().active_count(), 0);
    }

    #[test]
    fn group_with_missing_level_aborts() {
        let mut layout = WorldLayout::builtin();
        layout.puzzle_groups[2].levels.pop();
        let (mut builder, _) = make_builder(layout);
        let result = builder.build_world(Authority::Server, &[], &mut Rng::new(1));
        assert!(matches!(
            result,
            Err(BuildError::MalformedPuzzleGroup { levels: 3, .. })
        ));
        assert!(!builder.is_built());
    }

    #[test]
    fn client_cannot_build() {
        let (mut builder, _) = make_builder(WorldLayout::builtin());
        assert_eq!(
            builder.build_world(Authority::Client(2), &[], &mut Rng::new(1)),
            Err(BuildError::NotAuthoritative)
        );
        assert!(!builder.is_built());
    }

    #[test]
    fn same_seed_builds_same_table() {
        let (mut a, _) = make_builder(WorldLayout::builtin());
        let (mut b, _) = make_builder(WorldLayout::builtin());
        a.build_world(Authority::Server, &[], &mut Rng::new(2024))
            .expect("build a");
        b.build_world(Authority::Server, &[], &mut Rng::new(2024))
            .expect("build b");
        assert_eq!(a.placement_table(), b.placement_table());
    }

    #[test]
    fn build_places_and_initializes_sixteen_modules() {
        let (mut builder, _) = make_builder(WorldLayout::builtin());
        builder
            .build_world(Authority::Server, &[], &mut Rng::new(9))
            .expect("build succeeds");
        let events = builder.drain_events();
        let inits = events
            .iter()
            .filter(|event| matches!(event, WorldEvent::ModuleInitialized(_)))
            .count();
        assert_eq!(inits, ROUTE_COUNT * LEVEL_COUNT);
        assert!(events.contains(&WorldEvent::TemplatesDeactivated));
        assert!(matches!(
            events.last(),
            Some(WorldEvent::PlacementBroadcast(_))
        ));
        assert_eq!(builder.modules().active_count(), ROUTE_COUNT * LEVEL_COUNT);

        let table = builder.placement_table().expect("table recorded");
        for placement in table.placements() {
            let module = builder
                .modules()
                .get(ModuleKey::new(placement.puzzle_index, placement.level_index))
                .expect("module exists");
            let slot = builder.layout().routes[placement.route_index].slots[placement.level_index];
            assert_eq!(module.transform(), Some(slot));
            assert_eq!(module.color_id(), placement.color.id);
        }
    }

    #[test]
    fn reapplying_table_is_idempotent() {
        let (mut builder, _) = make_builder(WorldLayout::builtin());
        builder
            .build_world(Authority::Server, &[], &mut Rng::new(10))
            .expect("build succeeds");
        let table = builder.placement_table().cloned().expect("table recorded");
        let routes = builder.layout().routes.clone();
        let inits = builder
            .modules
            .apply_table(&table, &routes, "white", Authority::Server);
        assert!(inits.is_empty());
    }

    #[test]
    fn reset_allows_rebuild() {
        let (mut builder, _) = make_builder(WorldLayout::builtin());
        builder
            .build_world(Authority::Server, &[], &mut Rng::new(3))
            .expect("first build");
        builder.reset(Authority::Server);
        assert!(!builder.is_built());
        assert_eq!(builder.modules().active_count(), 0);
        assert_eq!(
            builder.build_world(Authority::Server, &[], &mut Rng::new(4)),
            Ok(BuildOutcome::Built)
        );
    }

    #[test]
    fn table_survives_wire_codec() {
        let (mut builder, catalog) = make_builder(WorldLayout::builtin());
        builder
            .build_world(Authority::Server, &[], &mut Rng::new(11))
            .expect("build succeeds");
        let table = builder.placement_table().expect("table recorded");
        let bytes = table.encode().expect("table encodes");
        let decoded = PlacementTable::decode(&bytes, &catalog).expect("table decodes");
        assert_eq!(&decoded, table);
    }
}
