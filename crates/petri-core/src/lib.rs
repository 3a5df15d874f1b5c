//! Core simulation for the Petri blob arena.
//!
//! A world of circular cells on a 2D plane: one player-controlled cell and a
//! population of autonomous ones. Cells overlap, the decisively larger one
//! absorbs the smaller, the population refills, and a smoothed camera chases
//! the player. The crate is synchronous and single-threaded; frontends drive
//! it one [`World::step`] at a time and read state back through accessors.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::{HashSet, VecDeque};
use std::f32::consts::SQRT_2;
use std::fmt;
use thiserror::Error;

new_key_type! {
    /// Stable handle for cells backed by a generational slot map.
    pub struct CellId;
}

/// Stems combined with a random number to name spawned bots.
const BOT_NAME_STEMS: [&str; 6] = ["Bot", "Cell", "Blob", "Sphere", "Circle", "Dot"];

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D position in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared center distance to `other`.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Center distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// Unit-length (or zero) steering vector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Direction {
    pub dx: f32,
    pub dy: f32,
}

impl Direction {
    /// Construct a direction without normalizing.
    #[must_use]
    pub const fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    /// Normalize an arbitrary vector, rejecting zero-magnitude input.
    #[must_use]
    pub fn from_vector(dx: f32, dy: f32) -> Option<Self> {
        let length = (dx * dx + dy * dy).sqrt();
        if length > 0.0 {
            Some(Self {
                dx: dx / length,
                dy: dy / length,
            })
        } else {
            None
        }
    }

    /// Unit vector pointing from `from` toward `to`, or `None` when the
    /// points coincide.
    #[must_use]
    pub fn between(from: Position, to: Position) -> Option<Self> {
        Self::from_vector(to.x - from.x, to.y - from.y)
    }

    /// Whether both components are exactly zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Who steers a cell.
///
/// Autonomous cells carry the retained heading the control policy keeps
/// between decisions; player-role cells have none because the cursor drives
/// them (split clones of the player keep the role but sit inert).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Role {
    Player,
    Autonomous { direction: Direction },
}

impl Role {
    /// An autonomous role with a zero initial heading.
    #[must_use]
    pub const fn autonomous() -> Self {
        Self::Autonomous {
            direction: Direction::new(0.0, 0.0),
        }
    }

    /// Whether this is a player-role cell.
    #[must_use]
    pub const fn is_player(&self) -> bool {
        matches!(self, Self::Player)
    }
}

/// Scalar state for a single cell.
///
/// `speed` is fixed at creation from the radius at that moment; growth does
/// not slow a cell down mid-life, and split clones copy the parent's value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellData {
    pub position: Position,
    pub radius: f32,
    pub color: [u8; 3],
    pub speed: f32,
    pub role: Role,
    pub name: Option<String>,
    pub feed_cooldown: u32,
    pub split_cooldown: u32,
}

impl Default for CellData {
    fn default() -> Self {
        Self {
            position: Position::default(),
            radius: 10.0,
            color: [255, 255, 255],
            speed: 0.0,
            role: Role::autonomous(),
            name: None,
            feed_cooldown: 0,
            split_cooldown: 0,
        }
    }
}

/// Dense storage with generational handles for cell access.
///
/// Handles stay valid across removals of other cells; dense order is the
/// deterministic iteration order used by the policy and resolver scans.
#[derive(Debug)]
pub struct CellArena {
    slots: SlotMap<CellId, usize>,
    handles: Vec<CellId>,
    rows: Vec<CellData>,
}

impl Default for CellArena {
    fn default() -> Self {
        Self::new()
    }
}

impl CellArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            handles: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Create an arena with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: SlotMap::with_capacity_and_key(capacity),
            handles: Vec::with_capacity(capacity),
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Number of live cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no cells are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over live handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = CellId> + '_ {
        self.handles.iter().copied()
    }

    /// Iterate over `(handle, cell)` pairs in dense iteration order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &CellData)> + '_ {
        self.handles.iter().copied().zip(self.rows.iter())
    }

    /// Borrow the dense row storage.
    #[must_use]
    pub fn rows(&self) -> &[CellData] {
        &self.rows
    }

    /// Mutably borrow the dense row storage.
    #[must_use]
    pub fn rows_mut(&mut self) -> &mut [CellData] {
        &mut self.rows
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: CellId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a live cell.
    #[must_use]
    pub fn contains(&self, id: CellId) -> bool {
        self.slots.contains_key(id)
    }

    /// Borrow the cell behind `id`.
    #[must_use]
    pub fn get(&self, id: CellId) -> Option<&CellData> {
        let index = self.index_of(id)?;
        self.rows.get(index)
    }

    /// Mutably borrow the cell behind `id`.
    #[must_use]
    pub fn get_mut(&mut self, id: CellId) -> Option<&mut CellData> {
        let index = self.index_of(id)?;
        self.rows.get_mut(index)
    }

    /// Insert a new cell and return its handle.
    pub fn insert(&mut self, cell: CellData) -> CellId {
        let index = self.rows.len();
        self.rows.push(cell);
        let id = self.slots.insert(index);
        self.handles.push(id);
        self.debug_assert_coherent();
        id
    }

    /// Remove `id`, returning its data if it was present.
    pub fn remove(&mut self, id: CellId) -> Option<CellData> {
        let index = self.slots.remove(id)?;
        let removed = self.rows.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        self.debug_assert_coherent();
        Some(removed)
    }

    /// Remove every cell whose id is in `dead`, preserving iteration order.
    pub fn remove_many(&mut self, dead: &HashSet<CellId>) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut write = 0;
        for read in 0..self.handles.len() {
            let id = self.handles[read];
            if dead.contains(&id) {
                self.slots.remove(id);
                continue;
            }
            if write != read {
                self.handles[write] = id;
                self.rows.swap(read, write);
            }
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = write;
            }
            write += 1;
        }
        let removed = self.handles.len().saturating_sub(write);
        self.handles.truncate(write);
        self.rows.truncate(write);
        self.debug_assert_coherent();
        removed
    }

    /// Produce a copy of the data for `id`.
    #[must_use]
    pub fn snapshot(&self, id: CellId) -> Option<CellData> {
        self.get(id).cloned()
    }

    /// Clear all stored cells.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.rows.clear();
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.handles.len(), self.rows.len());
        debug_assert_eq!(self.handles.len(), self.slots.len());
    }
}

/// Errors that can occur when constructing world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a Petri world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetriConfig {
    /// Viewport width in world units (one world unit per screen pixel).
    pub viewport_width: u32,
    /// Viewport height in world units.
    pub viewport_height: u32,
    /// World extent per axis as a multiple of the viewport (at least 1).
    pub world_scale: f32,
    /// Lower bound for spawned bot radii; the player starts at twice this.
    pub min_cell_radius: f32,
    /// Upper bound for spawned bot radii.
    pub max_bot_radius: f32,
    /// Bots created at startup; the population floor is this plus one.
    pub initial_bots: usize,
    /// Speed-scalar numerator for the player (`speed = n / sqrt(radius)`).
    pub player_speed_multiplier: f32,
    /// Speed-scalar numerator for autonomous cells.
    pub bot_speed_multiplier: f32,
    /// Fixed per-tick step length for autonomous movement.
    pub bot_step: f32,
    /// Radius ratio a cell must exceed to absorb (and to classify
    /// threat/prey); within the ratio cells pass through each other.
    pub absorb_ratio: f32,
    /// Fraction of the victim's radius transferred on absorption.
    pub absorb_efficiency: f32,
    /// Radius subtracted from the player and given to an ejected pellet.
    pub feed_mass: f32,
    /// Ticks before the player may feed again.
    pub feed_cooldown_ticks: u32,
    /// Minimum player radius required to split.
    pub split_min_mass: f32,
    /// Ticks before the player may split again.
    pub split_cooldown_ticks: u32,
    /// Per-update easing factor for the camera, in `(0, 1]`.
    pub camera_smoothing: f32,
    /// World-space spacing of background grid lines.
    pub grid_interval: f32,
    /// Simulation rate frontends should target, in steps per second.
    pub tick_hz: u32,
    /// Display name given to the controlled player cell.
    pub player_name: String,
    /// Colors sampled for the player and spawned bots.
    pub palette: Vec<[u8; 3]>,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Number of tick summaries retained for the HUD.
    pub history_capacity: usize,
}

impl Default for PetriConfig {
    fn default() -> Self {
        Self {
            viewport_width: 800,
            viewport_height: 600,
            world_scale: 2.0,
            min_cell_radius: 10.0,
            max_bot_radius: 40.0,
            initial_bots: 50,
            player_speed_multiplier: 3.5,
            bot_speed_multiplier: 2.0,
            bot_step: 1.5,
            absorb_ratio: 1.1,
            absorb_efficiency: 0.8,
            feed_mass: 5.0,
            feed_cooldown_ticks: 20,
            split_min_mass: 35.0,
            split_cooldown_ticks: 30,
            camera_smoothing: 0.1,
            grid_interval: 50.0,
            tick_hz: 60,
            player_name: "Player".to_string(),
            palette: default_palette(),
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

fn default_palette() -> Vec<[u8; 3]> {
    vec![
        [255, 0, 0],   // red
        [0, 255, 0],   // green
        [0, 0, 255],   // blue
        [255, 255, 0], // yellow
        [255, 0, 255], // magenta
        [0, 255, 255], // cyan
        [255, 165, 0], // orange
        [128, 0, 128], // purple
    ]
}

impl PetriConfig {
    /// Validates the configuration.
    ///
    /// The cross-field rules keep the global radius floor intact: no
    /// creation path (spawn, pellet, post-feed parent, split halves) may
    /// produce a cell below `feed_mass`.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(WorldError::InvalidConfig(
                "viewport dimensions must be non-zero",
            ));
        }
        if !self.world_scale.is_finite() || self.world_scale < 1.0 {
            return Err(WorldError::InvalidConfig(
                "world_scale must be at least 1",
            ));
        }
        if self.min_cell_radius <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "min_cell_radius must be positive",
            ));
        }
        if self.max_bot_radius < self.min_cell_radius {
            return Err(WorldError::InvalidConfig(
                "max_bot_radius must be at least min_cell_radius",
            ));
        }
        if self.player_speed_multiplier <= 0.0
            || self.bot_speed_multiplier <= 0.0
            || self.bot_step <= 0.0
        {
            return Err(WorldError::InvalidConfig(
                "speed multipliers and bot_step must be positive",
            ));
        }
        if self.absorb_ratio < 1.0 {
            return Err(WorldError::InvalidConfig(
                "absorb_ratio must be at least 1",
            ));
        }
        if self.absorb_efficiency <= 0.0 || self.absorb_efficiency > 1.0 {
            return Err(WorldError::InvalidConfig(
                "absorb_efficiency must be in (0, 1]",
            ));
        }
        if self.feed_mass <= 0.0 || self.feed_mass > self.min_cell_radius {
            return Err(WorldError::InvalidConfig(
                "feed_mass must be positive and no larger than min_cell_radius",
            ));
        }
        if self.split_min_mass < self.feed_mass * SQRT_2 {
            return Err(WorldError::InvalidConfig(
                "split_min_mass too small to keep split halves above the radius floor",
            ));
        }
        if self.camera_smoothing <= 0.0 || self.camera_smoothing > 1.0 {
            return Err(WorldError::InvalidConfig(
                "camera_smoothing must be in (0, 1]",
            ));
        }
        if self.grid_interval <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "grid_interval must be positive",
            ));
        }
        if self.tick_hz == 0 || self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "tick_hz and history_capacity must be non-zero",
            ));
        }
        if self.palette.is_empty() {
            return Err(WorldError::InvalidConfig("palette must not be empty"));
        }
        Ok(())
    }

    /// World width in world units.
    #[must_use]
    pub fn world_width(&self) -> f32 {
        self.viewport_width as f32 * self.world_scale
    }

    /// World height in world units.
    #[must_use]
    pub fn world_height(&self) -> f32 {
        self.viewport_height as f32 * self.world_scale
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Smoothed viewport camera tracking a focus point.
///
/// The offset is the world position of the viewport's top-left corner. Each
/// update eases toward centering the focus, then clamps so the viewport never
/// leaves the world.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Camera {
    offset: Position,
}

impl Camera {
    /// Current top-left offset in world units.
    #[must_use]
    pub const fn offset(&self) -> Position {
        self.offset
    }

    /// Convert a viewport-space point to world space.
    #[must_use]
    pub fn to_world(&self, point: Position) -> Position {
        Position::new(point.x + self.offset.x, point.y + self.offset.y)
    }

    /// Ease toward centering `focus` and clamp to the world bounds.
    pub fn update(&mut self, focus: Position, config: &PetriConfig) {
        let viewport_w = config.viewport_width as f32;
        let viewport_h = config.viewport_height as f32;
        let target_x = focus.x - viewport_w / 2.0;
        let target_y = focus.y - viewport_h / 2.0;
        self.offset.x += (target_x - self.offset.x) * config.camera_smoothing;
        self.offset.y += (target_y - self.offset.y) * config.camera_smoothing;
        self.offset.x = self.offset.x.clamp(0.0, config.world_width() - viewport_w);
        self.offset.y = self.offset.y.clamp(0.0, config.world_height() - viewport_h);
    }

    /// Snap back to the world origin.
    pub fn reset(&mut self) {
        self.offset = Position::default();
    }
}

/// Player action sampled from input for a single tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlayerCommand {
    Feed,
    Split,
}

/// Input intent for one tick, polled once at the start of the tick.
///
/// The cursor is in viewport coordinates; the world converts it through the
/// camera. At most one command applies per tick (last sampled press wins),
/// and a command tick performs no cursor movement.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TickInput {
    pub cursor: Position,
    pub command: Option<PlayerCommand>,
}

impl TickInput {
    /// Plain move-toward-cursor intent.
    #[must_use]
    pub const fn move_toward(cursor: Position) -> Self {
        Self {
            cursor,
            command: None,
        }
    }

    /// Intent carrying a feed or split command.
    #[must_use]
    pub const fn with_command(cursor: Position, command: PlayerCommand) -> Self {
        Self {
            cursor,
            command: Some(command),
        }
    }
}

/// One absorption decided by the resolver's read-only pass.
///
/// `gain` is computed from the victim's radius as it stood at the start of
/// the pass, before any growth from this tick applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsorbEvent {
    pub eater: CellId,
    pub eaten: CellId,
    pub gain: f32,
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Cells absorbed and removed this tick.
    pub absorbed: usize,
    /// Bots spawned by the population floor this tick.
    pub respawned: usize,
    /// Whether a feed command succeeded this tick.
    pub fed: bool,
    /// Whether a split command succeeded this tick.
    pub split: bool,
    /// Whether the phase flipped to game over during this tick.
    pub game_over: bool,
}

/// Per-tick summary retained in the world's bounded history ring.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub population: usize,
    pub player_radius: f32,
    pub absorbed: usize,
    pub respawned: usize,
}

/// Simulation phase. `GameOver` is terminal with respect to ticking until an
/// explicit restart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum GamePhase {
    Running,
    GameOver { final_radius: f32 },
}

impl GamePhase {
    /// Whether the simulation is accepting ticks.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the game has ended.
    #[must_use]
    pub const fn is_game_over(&self) -> bool {
        matches!(self, Self::GameOver { .. })
    }
}

/// Aggregate world state shared by the simulation and rendering layers.
pub struct World {
    config: PetriConfig,
    rng: SmallRng,
    tick: Tick,
    phase: GamePhase,
    cells: CellArena,
    player: CellId,
    camera: Camera,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("phase", &self.phase)
            .field("population", &self.cells.len())
            .finish()
    }
}

impl World {
    /// Instantiate a new world using the supplied configuration.
    pub fn new(config: PetriConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let (cells, player) = Self::populate(&config, &mut rng);
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            rng,
            tick: Tick::zero(),
            phase: GamePhase::Running,
            cells,
            player,
            camera: Camera::default(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Rebuild the world from its stored configuration.
    ///
    /// A fixed `rng_seed` reproduces the same initial world; without one the
    /// restart draws fresh entropy.
    pub fn restart(&mut self) {
        self.rng = self.config.seeded_rng();
        let (cells, player) = Self::populate(&self.config, &mut self.rng);
        self.cells = cells;
        self.player = player;
        self.camera.reset();
        self.tick = Tick::zero();
        self.phase = GamePhase::Running;
        self.history.clear();
    }

    fn populate(config: &PetriConfig, rng: &mut SmallRng) -> (CellArena, CellId) {
        let mut cells = CellArena::with_capacity(config.initial_bots + 1);
        let player = cells.insert(Self::player_cell(config, rng));
        for _ in 0..config.initial_bots {
            cells.insert(Self::bot_cell(config, rng));
        }
        (cells, player)
    }

    fn player_cell(config: &PetriConfig, rng: &mut SmallRng) -> CellData {
        let radius = config.min_cell_radius * 2.0;
        CellData {
            position: Position::new(
                config.viewport_width as f32 / 2.0,
                config.viewport_height as f32 / 2.0,
            ),
            radius,
            color: config.palette[rng.random_range(0..config.palette.len())],
            speed: config.player_speed_multiplier / radius.sqrt(),
            role: Role::Player,
            name: Some(config.player_name.clone()),
            feed_cooldown: 0,
            split_cooldown: 0,
        }
    }

    fn bot_cell(config: &PetriConfig, rng: &mut SmallRng) -> CellData {
        let radius = rng.random_range(config.min_cell_radius..=config.max_bot_radius);
        let stem = BOT_NAME_STEMS[rng.random_range(0..BOT_NAME_STEMS.len())];
        let number: u32 = rng.random_range(1..=99);
        CellData {
            position: Position::new(
                rng.random_range(0.0..config.world_width()),
                rng.random_range(0.0..config.world_height()),
            ),
            radius,
            color: config.palette[rng.random_range(0..config.palette.len())],
            speed: config.bot_speed_multiplier / radius.sqrt(),
            role: Role::autonomous(),
            name: Some(format!("{stem}{number}")),
            feed_cooldown: 0,
            split_cooldown: 0,
        }
    }

    /// Execute one simulation tick, returning emitted events.
    ///
    /// While the phase is [`GamePhase::GameOver`] the call is a no-op that
    /// reports the current tick.
    pub fn step(&mut self, input: &TickInput) -> TickEvents {
        if self.phase.is_game_over() {
            return TickEvents {
                tick: self.tick,
                ..TickEvents::default()
            };
        }

        let next_tick = self.tick.next();
        let (fed, split) = self.stage_player_intent(input);
        self.stage_cooldowns();
        self.stage_autonomous();
        let absorbed = self.stage_resolution();
        let respawned = self.stage_population();
        self.stage_camera();
        self.tick = next_tick;

        let events = TickEvents {
            tick: next_tick,
            absorbed,
            respawned,
            fed,
            split,
            game_over: self.phase.is_game_over(),
        };
        self.record_summary(&events);
        events
    }

    fn stage_player_intent(&mut self, input: &TickInput) -> (bool, bool) {
        let target = self.camera.to_world(input.cursor);
        match input.command {
            Some(PlayerCommand::Feed) => (self.try_feed(target), false),
            Some(PlayerCommand::Split) => (false, self.try_split(target)),
            None => {
                self.move_player(target);
                (false, false)
            }
        }
    }

    fn move_player(&mut self, target: Position) {
        let Some(cell) = self.cells.get_mut(self.player) else {
            return;
        };
        let dx = target.x - cell.position.x;
        let dy = target.y - cell.position.y;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance > 0.0 {
            cell.position.x += dx / distance * cell.speed;
            cell.position.y += dy / distance * cell.speed;
        }
    }

    fn try_feed(&mut self, target: Position) -> bool {
        let feed_mass = self.config.feed_mass;
        let cooldown = self.config.feed_cooldown_ticks;
        let bot_speed = self.config.bot_speed_multiplier;
        let Some(player) = self.cells.get(self.player) else {
            return false;
        };
        if player.feed_cooldown != 0 || player.radius <= feed_mass * 2.0 {
            return false;
        }
        let Some(direction) = Direction::between(player.position, target) else {
            return false;
        };
        let origin = player.position;
        let color = player.color;
        let new_radius = player.radius - feed_mass;
        if let Some(player) = self.cells.get_mut(self.player) {
            player.radius = new_radius;
            player.feed_cooldown = cooldown;
        }
        let reach = new_radius + feed_mass;
        self.cells.insert(CellData {
            position: Position::new(
                origin.x + direction.dx * reach,
                origin.y + direction.dy * reach,
            ),
            radius: feed_mass,
            color,
            speed: bot_speed / feed_mass.sqrt(),
            role: Role::autonomous(),
            name: None,
            feed_cooldown: 0,
            split_cooldown: 0,
        });
        true
    }

    fn try_split(&mut self, target: Position) -> bool {
        let split_min = self.config.split_min_mass;
        let cooldown = self.config.split_cooldown_ticks;
        let Some(player) = self.cells.get(self.player) else {
            return false;
        };
        if player.split_cooldown != 0 || player.radius < split_min {
            return false;
        }
        let Some(direction) = Direction::between(player.position, target) else {
            return false;
        };
        let origin = player.position;
        let new_radius = player.radius / SQRT_2;
        let clone = CellData {
            position: Position::new(
                origin.x + direction.dx * new_radius * 2.0,
                origin.y + direction.dy * new_radius * 2.0,
            ),
            radius: new_radius,
            color: player.color,
            speed: player.speed,
            role: player.role,
            name: player.name.clone(),
            feed_cooldown: 0,
            split_cooldown: 0,
        };
        if let Some(player) = self.cells.get_mut(self.player) {
            player.radius = new_radius;
            player.split_cooldown = cooldown;
        }
        self.cells.insert(clone);
        true
    }

    fn stage_cooldowns(&mut self) {
        for cell in self.cells.rows_mut() {
            if cell.feed_cooldown > 0 {
                cell.feed_cooldown -= 1;
            }
            if cell.split_cooldown > 0 {
                cell.split_cooldown -= 1;
            }
        }
    }

    fn stage_autonomous(&mut self) {
        let ratio = self.config.absorb_ratio;
        let step = self.config.bot_step;
        let world_w = self.config.world_width();
        let world_h = self.config.world_height();
        // All bots decide against the same pre-move view.
        let view: Vec<(Position, f32)> = self
            .cells
            .rows()
            .iter()
            .map(|cell| (cell.position, cell.radius))
            .collect();
        for index in 0..view.len() {
            let cell = &mut self.cells.rows_mut()[index];
            let Role::Autonomous { direction } = &mut cell.role else {
                continue;
            };
            if let Some(updated) = choose_direction(&view, index, ratio) {
                *direction = updated;
            }
            let heading = *direction;
            cell.position.x = (cell.position.x + heading.dx * step).clamp(0.0, world_w);
            cell.position.y = (cell.position.y + heading.dy * step).clamp(0.0, world_h);
        }
    }

    fn stage_resolution(&mut self) -> usize {
        let events = self.collect_absorptions();
        if events.is_empty() {
            return 0;
        }
        self.apply_absorptions(&events)
    }

    /// Read-only decision pass over dense pair order.
    ///
    /// A marked victim takes part in no further pairs; an eater stays
    /// eligible and may itself fall to a later pair, with every gain taken
    /// from the radii as they stood at the start of the pass.
    fn collect_absorptions(&self) -> Vec<AbsorbEvent> {
        let ratio = self.config.absorb_ratio;
        let efficiency = self.config.absorb_efficiency;
        let rows = self.cells.rows();
        let handles: Vec<CellId> = self.cells.iter_handles().collect();
        let mut eaten = vec![false; rows.len()];
        let mut events = Vec::new();
        for i in 0..rows.len() {
            if eaten[i] {
                continue;
            }
            for j in (i + 1)..rows.len() {
                if eaten[j] {
                    continue;
                }
                let (a, b) = (&rows[i], &rows[j]);
                let reach = a.radius + b.radius;
                if a.position.distance_squared(b.position) >= reach * reach {
                    continue;
                }
                if a.radius > b.radius * ratio {
                    events.push(AbsorbEvent {
                        eater: handles[i],
                        eaten: handles[j],
                        gain: b.radius * efficiency,
                    });
                    eaten[j] = true;
                } else if b.radius > a.radius * ratio {
                    events.push(AbsorbEvent {
                        eater: handles[j],
                        eaten: handles[i],
                        gain: a.radius * efficiency,
                    });
                    eaten[i] = true;
                    break;
                }
            }
        }
        events
    }

    fn apply_absorptions(&mut self, events: &[AbsorbEvent]) -> usize {
        let mut dead = HashSet::with_capacity(events.len());
        for event in events {
            if let Some(eater) = self.cells.get_mut(event.eater) {
                eater.radius += event.gain;
            }
            dead.insert(event.eaten);
        }
        if dead.contains(&self.player) {
            let final_radius = self
                .cells
                .get(self.player)
                .map_or(0.0, |player| player.radius);
            self.phase = GamePhase::GameOver { final_radius };
        }
        self.cells.remove_many(&dead)
    }

    fn stage_population(&mut self) -> usize {
        let floor = self.config.initial_bots + 1;
        let mut spawned = 0;
        while self.cells.len() < floor {
            let bot = Self::bot_cell(&self.config, &mut self.rng);
            self.cells.insert(bot);
            spawned += 1;
        }
        spawned
    }

    fn stage_camera(&mut self) {
        if !self.phase.is_running() {
            return;
        }
        let Some(player) = self.cells.get(self.player) else {
            return;
        };
        let focus = player.position;
        self.camera.update(focus, &self.config);
    }

    fn record_summary(&mut self, events: &TickEvents) {
        let player_radius = match self.phase {
            GamePhase::GameOver { final_radius } => final_radius,
            GamePhase::Running => self
                .cells
                .get(self.player)
                .map_or(0.0, |player| player.radius),
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TickSummary {
            tick: events.tick,
            population: self.cells.len(),
            player_radius,
            absorbed: events.absorbed,
            respawned: events.respawned,
        });
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &PetriConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Current simulation phase.
    #[must_use]
    pub const fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Current camera state.
    #[must_use]
    pub const fn camera(&self) -> Camera {
        self.camera
    }

    /// Read-only access to the cell arena.
    #[must_use]
    pub fn cells(&self) -> &CellArena {
        &self.cells
    }

    /// Mutable access to the cell arena.
    #[must_use]
    pub fn cells_mut(&mut self) -> &mut CellArena {
        &mut self.cells
    }

    /// Handle of the controlled player cell.
    #[must_use]
    pub const fn player_id(&self) -> CellId {
        self.player
    }

    /// Radius of the controlled player cell while it is alive.
    #[must_use]
    pub fn player_radius(&self) -> Option<f32> {
        self.cells.get(self.player).map(|player| player.radius)
    }

    /// Number of live cells.
    #[must_use]
    pub fn population(&self) -> usize {
        self.cells.len()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Insert a cell directly, returning its handle.
    pub fn spawn_cell(&mut self, cell: CellData) -> CellId {
        self.cells.insert(cell)
    }

    /// Remove a cell by handle, returning its last known data.
    pub fn remove_cell(&mut self, id: CellId) -> Option<CellData> {
        self.cells.remove(id)
    }
}

/// Pick a steering direction for the autonomous cell at `index`, or `None`
/// to keep drifting on the retained heading.
///
/// Threats and prey are tracked independently by nearest center distance;
/// any threat outranks every prey.
fn choose_direction(view: &[(Position, f32)], index: usize, ratio: f32) -> Option<Direction> {
    let (origin, radius) = view[index];
    let mut nearest_threat: Option<(f32, Position)> = None;
    let mut nearest_prey: Option<(f32, Position)> = None;
    for (other, &(position, other_radius)) in view.iter().enumerate() {
        if other == index {
            continue;
        }
        let dist_sq = origin.distance_squared(position);
        if other_radius > radius * ratio {
            if nearest_threat.is_none_or(|(best, _)| dist_sq < best) {
                nearest_threat = Some((dist_sq, position));
            }
        } else if radius > other_radius * ratio
            && nearest_prey.is_none_or(|(best, _)| dist_sq < best)
        {
            nearest_prey = Some((dist_sq, position));
        }
    }
    if let Some((_, threat)) = nearest_threat {
        Direction::from_vector(origin.x - threat.x, origin.y - threat.y)
    } else if let Some((_, prey)) = nearest_prey {
        Direction::from_vector(prey.x - origin.x, prey.y - origin.y)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn test_config() -> PetriConfig {
        PetriConfig {
            initial_bots: 0,
            rng_seed: Some(7),
            ..PetriConfig::default()
        }
    }

    fn lone_player_world() -> World {
        World::new(test_config()).expect("test config must validate")
    }

    fn bot_at(position: Position, radius: f32) -> CellData {
        CellData {
            position,
            radius,
            name: Some("Bot1".to_string()),
            ..CellData::default()
        }
    }

    fn player_center() -> Position {
        Position::new(400.0, 300.0)
    }

    fn neutral_input(world: &World) -> TickInput {
        // Cursor over the player's own center keeps it stationary.
        let focus = world
            .cells()
            .get(world.player_id())
            .expect("player alive")
            .position;
        let offset = world.camera().offset();
        TickInput::move_toward(Position::new(focus.x - offset.x, focus.y - offset.y))
    }

    #[test]
    fn insert_allocates_unique_handles() {
        let mut arena = CellArena::new();
        let a = arena.insert(bot_at(Position::new(0.0, 0.0), 10.0));
        let b = arena.insert(bot_at(Position::new(1.0, 1.0), 12.0));
        let c = arena.insert(bot_at(Position::new(2.0, 2.0), 14.0));
        assert_eq!(arena.len(), 3);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(arena.index_of(a), Some(0));
        assert_eq!(arena.index_of(b), Some(1));
        assert_eq!(arena.index_of(c), Some(2));
    }

    #[test]
    fn remove_compacts_and_invalidates_handles() {
        let mut arena = CellArena::new();
        let a = arena.insert(bot_at(Position::new(0.0, 0.0), 10.0));
        let b = arena.insert(bot_at(Position::new(1.0, 1.0), 12.0));
        let c = arena.insert(bot_at(Position::new(2.0, 2.0), 14.0));

        let removed = arena.remove(a).expect("cell present");
        assert!(approx_eq(removed.radius, 10.0));
        assert_eq!(arena.len(), 2);
        assert!(!arena.contains(a));
        assert!(arena.get(a).is_none());
        // Tail cell swapped into the vacated dense slot.
        assert_eq!(arena.index_of(c), Some(0));
        assert_eq!(arena.index_of(b), Some(1));
    }

    #[test]
    fn remove_many_preserves_dense_order() {
        let mut arena = CellArena::new();
        let ids: Vec<CellId> = (0..5)
            .map(|n| arena.insert(bot_at(Position::new(n as f32, 0.0), 10.0 + n as f32)))
            .collect();

        let dead: HashSet<CellId> = [ids[1], ids[3]].into_iter().collect();
        assert_eq!(arena.remove_many(&dead), 2);
        let kept: Vec<CellId> = arena.iter_handles().collect();
        assert_eq!(kept, vec![ids[0], ids[2], ids[4]]);
        assert_eq!(arena.index_of(ids[4]), Some(2));
        assert!(!arena.contains(ids[1]));
    }

    #[test]
    fn default_config_validates() {
        PetriConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn config_rejects_bad_geometry() {
        let shrunk = PetriConfig {
            world_scale: 0.5,
            ..PetriConfig::default()
        };
        assert!(matches!(
            shrunk.validate(),
            Err(WorldError::InvalidConfig(_))
        ));

        let inverted = PetriConfig {
            max_bot_radius: 5.0,
            ..PetriConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(WorldError::InvalidConfig(_))
        ));

        let heavy_pellet = PetriConfig {
            feed_mass: 12.0,
            ..PetriConfig::default()
        };
        assert!(matches!(
            heavy_pellet.validate(),
            Err(WorldError::InvalidConfig(_))
        ));
    }

    #[test]
    fn direction_normalizes_and_rejects_degenerate_input() {
        let dir = Direction::from_vector(3.0, 4.0).expect("non-zero vector");
        assert!(approx_eq(dir.dx, 0.6));
        assert!(approx_eq(dir.dy, 0.8));
        assert!(Direction::from_vector(0.0, 0.0).is_none());
        assert!(Direction::between(player_center(), player_center()).is_none());
    }

    #[test]
    fn player_moves_toward_cursor_at_fixed_speed() {
        let mut world = lone_player_world();
        let speed = world
            .cells()
            .get(world.player_id())
            .expect("player alive")
            .speed;
        assert!(approx_eq(speed, 3.5 / 20.0_f32.sqrt()));

        world.step(&TickInput::move_toward(Position::new(500.0, 300.0)));
        let player = world.cells().get(world.player_id()).expect("player alive");
        assert!(approx_eq(player.position.x, 400.0 + speed));
        assert!(approx_eq(player.position.y, 300.0));
    }

    #[test]
    fn player_with_cursor_on_center_stays_put() {
        let mut world = lone_player_world();
        let input = neutral_input(&world);
        world.step(&input);
        let player = world.cells().get(world.player_id()).expect("player alive");
        assert_eq!(player.position, player_center());
    }

    #[test]
    fn feed_spawns_pellet_and_shrinks_player() {
        let mut world = lone_player_world();
        let events = world.step(&TickInput::with_command(
            Position::new(500.0, 300.0),
            PlayerCommand::Feed,
        ));

        assert!(events.fed);
        assert_eq!(world.population(), 2);
        let player = world.cells().get(world.player_id()).expect("player alive");
        assert!(approx_eq(player.radius, 15.0));
        // Command ticks never move the player.
        assert_eq!(player.position, player_center());
        // Reset to the configured cooldown, then decremented this same tick.
        assert_eq!(
            player.feed_cooldown,
            world.config().feed_cooldown_ticks - 1
        );

        let (_, pellet) = world
            .cells()
            .iter()
            .find(|(id, _)| *id != world.player_id())
            .expect("pellet spawned");
        assert!(approx_eq(pellet.radius, 5.0));
        // Ejected to 420, then the pellet flees its larger parent by one
        // bot step within the same tick.
        assert!(approx_eq(pellet.position.x, 421.5));
        assert!(approx_eq(pellet.position.y, 300.0));
        assert_eq!(pellet.color, player.color);
        assert_eq!(pellet.name, None);
        assert!(!pellet.role.is_player());
    }

    #[test]
    fn feed_rejected_at_mass_gate() {
        let mut world = lone_player_world();
        let player_id = world.player_id();
        world
            .cells_mut()
            .get_mut(player_id)
            .expect("player alive")
            .radius = 10.0;

        let events = world.step(&TickInput::with_command(
            Position::new(500.0, 300.0),
            PlayerCommand::Feed,
        ));

        assert!(!events.fed);
        assert_eq!(world.population(), 1);
        let player = world.cells().get(player_id).expect("player alive");
        assert!(approx_eq(player.radius, 10.0));
        assert_eq!(player.feed_cooldown, 0);
        // A rejected command still consumes the tick's intent.
        assert_eq!(player.position, player_center());
    }

    #[test]
    fn feed_rejected_while_cooling_down() {
        let mut world = lone_player_world();
        let feed = TickInput::with_command(Position::new(500.0, 300.0), PlayerCommand::Feed);
        assert!(world.step(&feed).fed);
        assert!(!world.step(&feed).fed);
        assert_eq!(world.population(), 2);
    }

    #[test]
    fn feed_with_coincident_cursor_is_noop() {
        let mut world = lone_player_world();
        let events = world.step(&TickInput::with_command(
            player_center(),
            PlayerCommand::Feed,
        ));

        assert!(!events.fed);
        assert_eq!(world.population(), 1);
        let player = world.cells().get(world.player_id()).expect("player alive");
        assert!(approx_eq(player.radius, 20.0));
        assert_eq!(player.feed_cooldown, 0);
    }

    #[test]
    fn split_halves_radius_and_copies_identity() {
        let mut world = lone_player_world();
        let player_id = world.player_id();
        world
            .cells_mut()
            .get_mut(player_id)
            .expect("player alive")
            .radius = 40.0;
        let speed_before = world.cells().get(player_id).expect("player alive").speed;

        let events = world.step(&TickInput::with_command(
            Position::new(500.0, 300.0),
            PlayerCommand::Split,
        ));

        assert!(events.split);
        assert_eq!(world.population(), 2);
        let half = 40.0 / SQRT_2;
        let player = world.cells().get(player_id).expect("player alive");
        assert!(approx_eq(player.radius, half));
        assert_eq!(
            player.split_cooldown,
            world.config().split_cooldown_ticks - 1
        );

        let (_, clone) = world
            .cells()
            .iter()
            .find(|(id, _)| *id != player_id)
            .expect("clone spawned");
        assert!(approx_eq(clone.radius, half));
        assert!(approx_eq(clone.position.x, 400.0 + half * 2.0));
        assert!(approx_eq(clone.position.y, 300.0));
        assert!(clone.role.is_player());
        assert_eq!(clone.name.as_deref(), Some("Player"));
        assert!(approx_eq(clone.speed, speed_before));
        // Area is conserved across the halves.
        assert!(approx_eq(2.0 * half * half, 40.0 * 40.0));
    }

    #[test]
    fn split_rejected_below_minimum_mass() {
        let mut world = lone_player_world();
        let player_id = world.player_id();
        world
            .cells_mut()
            .get_mut(player_id)
            .expect("player alive")
            .radius = 34.0;

        let events = world.step(&TickInput::with_command(
            Position::new(500.0, 300.0),
            PlayerCommand::Split,
        ));

        assert!(!events.split);
        assert_eq!(world.population(), 1);
        assert!(approx_eq(
            world.player_radius().expect("player alive"),
            34.0
        ));
    }

    #[test]
    fn bot_flees_nearest_threat_over_closer_prey() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(bot_at(Position::new(100.0, 100.0), 20.0));
        world.spawn_cell(bot_at(Position::new(140.0, 100.0), 10.0)); // prey, closer
        world.spawn_cell(bot_at(Position::new(200.0, 100.0), 40.0)); // threat, farther

        let input = neutral_input(&world);
        world.step(&input);

        let fled = world.cells().get(bot).expect("bot alive");
        assert!(approx_eq(fled.position.x, 100.0 - 1.5));
        assert!(approx_eq(fled.position.y, 100.0));
    }

    #[test]
    fn bot_chases_nearest_prey_when_unthreatened() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(bot_at(Position::new(100.0, 100.0), 30.0));
        world.spawn_cell(bot_at(Position::new(160.0, 100.0), 10.0));

        let input = neutral_input(&world);
        world.step(&input);

        let hunter = world.cells().get(bot).expect("bot alive");
        assert!(approx_eq(hunter.position.x, 100.0 + 1.5));
        assert!(approx_eq(hunter.position.y, 100.0));
    }

    #[test]
    fn bot_retains_heading_without_targets() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(CellData {
            position: Position::new(100.0, 100.0),
            radius: 20.0,
            role: Role::Autonomous {
                direction: Direction::new(0.0, 1.0),
            },
            ..CellData::default()
        });

        let input = neutral_input(&world);
        world.step(&input);

        let drifter = world.cells().get(bot).expect("bot alive");
        assert!(approx_eq(drifter.position.x, 100.0));
        assert!(approx_eq(drifter.position.y, 101.5));
    }

    #[test]
    fn bot_clamps_to_world_bounds() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(CellData {
            position: Position::new(1599.5, 100.0),
            radius: 20.0,
            role: Role::Autonomous {
                direction: Direction::new(1.0, 0.0),
            },
            ..CellData::default()
        });

        let input = neutral_input(&world);
        world.step(&input);

        let pinned = world.cells().get(bot).expect("bot alive");
        assert!(approx_eq(pinned.position.x, world.config().world_width()));
    }

    #[test]
    fn absorption_transfers_mass_exactly() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(bot_at(Position::new(405.0, 300.0), 10.0));

        let input = neutral_input(&world);
        let events = world.step(&input);

        assert_eq!(events.absorbed, 1);
        assert_eq!(events.respawned, 0);
        assert!(!world.cells().contains(bot));
        assert!(approx_eq(
            world.player_radius().expect("player alive"),
            28.0
        ));
    }

    #[test]
    fn near_equal_cells_pass_through() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(bot_at(Position::new(405.0, 300.0), 21.0));

        let input = neutral_input(&world);
        let events = world.step(&input);

        assert_eq!(events.absorbed, 0);
        assert!(world.cells().contains(bot));
        assert!(approx_eq(
            world.player_radius().expect("player alive"),
            20.0
        ));
        assert!(approx_eq(
            world.cells().get(bot).expect("bot alive").radius,
            21.0
        ));
    }

    #[test]
    fn absorption_chain_uses_pre_pass_radii() {
        let mut world = lone_player_world();
        // A eats B in pair order, then C eats A; C's gain must come from
        // A's radius before it grew.
        let a = world.spawn_cell(bot_at(Position::new(100.0, 100.0), 30.0));
        let b = world.spawn_cell(bot_at(Position::new(105.0, 100.0), 10.0));
        let c = world.spawn_cell(bot_at(Position::new(140.0, 100.0), 45.0));

        let input = neutral_input(&world);
        let events = world.step(&input);

        assert_eq!(events.absorbed, 2);
        assert!(!world.cells().contains(a));
        assert!(!world.cells().contains(b));
        assert!(approx_eq(
            world.cells().get(c).expect("cell alive").radius,
            45.0 + 30.0 * 0.8
        ));
    }

    #[test]
    fn population_refills_to_floor() {
        let mut config = test_config();
        config.initial_bots = 2;
        let mut world = World::new(config).expect("config valid");

        // Replace the random bots with controlled ones far from everything.
        let random_bots: Vec<CellId> = world
            .cells()
            .iter()
            .filter(|(id, _)| *id != world.player_id())
            .map(|(id, _)| id)
            .collect();
        for id in random_bots {
            world.remove_cell(id);
        }
        world.spawn_cell(bot_at(Position::new(100.0, 100.0), 20.0));

        let input = neutral_input(&world);
        let events = world.step(&input);

        assert_eq!(events.respawned, 1);
        assert_eq!(world.population(), 3);
        for (_, cell) in world.cells().iter() {
            assert!(cell.radius >= world.config().feed_mass);
            assert!(cell.radius <= world.config().max_bot_radius.max(20.0));
        }
    }

    #[test]
    fn pellets_count_toward_population_floor() {
        let mut config = test_config();
        config.initial_bots = 1;
        let mut world = World::new(config).expect("config valid");
        let extra: Vec<CellId> = world
            .cells()
            .iter()
            .filter(|(id, _)| *id != world.player_id())
            .map(|(id, _)| id)
            .collect();
        for id in extra {
            world.remove_cell(id);
        }

        // The pellet takes the vacant seat below the floor, so no bot spawns.
        let events = world.step(&TickInput::with_command(
            Position::new(500.0, 300.0),
            PlayerCommand::Feed,
        ));

        assert!(events.fed);
        assert_eq!(events.respawned, 0);
        assert_eq!(world.population(), 2);
    }

    #[test]
    fn camera_eases_toward_focus() {
        let config = test_config();
        let mut camera = Camera::default();
        camera.update(Position::new(1000.0, 700.0), &config);
        assert!(approx_eq(camera.offset().x, 60.0));
        assert!(approx_eq(camera.offset().y, 40.0));

        let world_point = camera.to_world(Position::new(10.0, 10.0));
        assert!(approx_eq(world_point.x, 70.0));
        assert!(approx_eq(world_point.y, 50.0));
    }

    #[test]
    fn camera_pins_to_world_corners() {
        let config = test_config();
        let mut camera = Camera::default();
        for _ in 0..50 {
            camera.update(Position::new(0.0, 0.0), &config);
        }
        assert_eq!(camera.offset(), Position::new(0.0, 0.0));

        for _ in 0..50 {
            camera.update(
                Position::new(config.world_width(), config.world_height()),
                &config,
            );
        }
        assert_eq!(camera.offset(), Position::new(800.0, 600.0));
    }

    #[test]
    fn player_eaten_ends_game() {
        let mut world = lone_player_world();
        let bot = world.spawn_cell(bot_at(Position::new(405.0, 300.0), 30.0));

        let input = neutral_input(&world);
        let events = world.step(&input);

        assert!(events.game_over);
        assert_eq!(events.absorbed, 1);
        assert!(world.player_radius().is_none());
        assert!(matches!(
            world.phase(),
            GamePhase::GameOver { final_radius } if approx_eq(final_radius, 20.0)
        ));
        assert!(approx_eq(
            world.cells().get(bot).expect("bot alive").radius,
            30.0 + 20.0 * 0.8
        ));
    }

    #[test]
    fn game_over_halts_ticking() {
        let mut world = lone_player_world();
        world.spawn_cell(bot_at(Position::new(405.0, 300.0), 30.0));
        let input = neutral_input(&world);
        world.step(&input);
        assert!(world.phase().is_game_over());

        let tick_before = world.tick();
        let population_before = world.population();
        let events = world.step(&TickInput::move_toward(Position::new(0.0, 0.0)));

        assert_eq!(world.tick(), tick_before);
        assert_eq!(events.tick, tick_before);
        assert!(!events.game_over);
        assert_eq!(world.population(), population_before);
    }

    #[test]
    fn restart_rebuilds_seeded_world() {
        let mut config = test_config();
        config.initial_bots = 4;
        let reference = World::new(config.clone()).expect("config valid");
        let mut world = World::new(config).expect("config valid");

        world.spawn_cell(bot_at(Position::new(405.0, 300.0), 30.0));
        let input = neutral_input(&world);
        world.step(&input);
        world.restart();

        assert_eq!(world.tick(), Tick::zero());
        assert!(world.phase().is_running());
        assert_eq!(world.population(), reference.population());
        assert_eq!(world.history().count(), 0);
        for (a, b) in world.cells().rows().iter().zip(reference.cells().rows()) {
            assert_eq!(a.position, b.position);
            assert!(approx_eq(a.radius, b.radius));
            assert_eq!(a.name, b.name);
        }
    }

    #[test]
    fn seeded_runs_are_deterministic() {
        let config = PetriConfig {
            initial_bots: 20,
            rng_seed: Some(42),
            ..PetriConfig::default()
        };
        let mut left = World::new(config.clone()).expect("config valid");
        let mut right = World::new(config).expect("config valid");

        let cursor = Position::new(400.0, 300.0);
        for _ in 0..50 {
            let a = left.step(&TickInput::move_toward(cursor));
            let b = right.step(&TickInput::move_toward(cursor));
            assert_eq!(a, b);
        }
        let lhs: Vec<TickSummary> = left.history().cloned().collect();
        let rhs: Vec<TickSummary> = right.history().cloned().collect();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn history_ring_is_bounded() {
        let mut config = test_config();
        config.history_capacity = 4;
        let mut world = World::new(config).expect("config valid");
        let input = neutral_input(&world);
        for _ in 0..10 {
            world.step(&input);
        }
        assert_eq!(world.history().count(), 4);
        let last = world.history().last().expect("history non-empty");
        assert_eq!(last.tick, Tick(10));
    }

    #[test]
    fn cooldowns_tick_down_across_idle_ticks() {
        let mut world = lone_player_world();
        world.step(&TickInput::with_command(
            Position::new(500.0, 300.0),
            PlayerCommand::Feed,
        ));
        let after_feed = world
            .cells()
            .get(world.player_id())
            .expect("player alive")
            .feed_cooldown;

        let input = neutral_input(&world);
        world.step(&input);
        let next = world
            .cells()
            .get(world.player_id())
            .expect("player alive")
            .feed_cooldown;
        assert_eq!(next, after_feed - 1);
    }
}
