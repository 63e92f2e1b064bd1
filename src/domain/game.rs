//! Headless arcade simulation: a taco falling under gravity that flaps
//! upward between scrolling tubes. Only the events matter here; nothing is drawn.

pub const CANVAS_WIDTH: f64 = 640.0;
pub const CANVAS_HEIGHT: f64 = 480.0;

const TACO_HALF_SIZE: f64 = 12.0;
const TUBE_WIDTH: f64 = 40.0;
const TUBE_GAP_HEIGHT: f64 = 160.0;
const TUBE_MIN_HEIGHT: f64 = 60.0;
const TUBE_SPACING: f64 = 340.0;

/// Gap offsets as a fraction of the free vertical range, cycled per tube reset.
const GAP_TABLE: [f64; 8] = [0.5, 0.2, 0.75, 0.35, 0.9, 0.1, 0.6, 0.45];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    Flapped,
    /// A tube scrolled past the taco
    Passed,
    Crashed,
}

#[derive(Debug, Clone)]
pub struct Taco {
    pub x: f64,
    pub y: f64,
    speed_y: f64,
    speed: f64,
    gravity: f64,
    min_speed_y: f64,
    max_speed_y: f64,
}

impl Taco {
    pub fn new(speed: f64) -> Self {
        Self {
            x: CANVAS_WIDTH / 3.0,
            y: CANVAS_HEIGHT / 2.0,
            speed_y: 0.0,
            speed: speed.max(1.0),
            gravity: 60.0,
            min_speed_y: -80.0,
            max_speed_y: 80.0,
        }
    }

    pub fn update(&mut self) {
        self.y += self.speed_y / self.speed;
        self.y = self.y.clamp(-100.0, CANVAS_HEIGHT + 100.0);

        self.speed_y = (self.speed_y + self.gravity / self.speed)
            .clamp(self.min_speed_y, self.max_speed_y);
    }

    pub fn flap(&mut self) {
        self.speed_y = self.min_speed_y;
    }

    pub fn speed_y(&self) -> f64 {
        self.speed_y
    }

    /// Nose angle in radians, following vertical speed
    pub fn rotation(&self) -> f64 {
        (self.speed_y / self.speed).atan()
    }
}

#[derive(Debug, Clone)]
pub struct Tube {
    pub x: f64,
    /// Height of the upper tube; the gap starts here
    pub gap_top: f64,
    speed: f64,
    passed: bool,
}

impl Tube {
    fn new(x: f64, speed: f64, gap_fraction: f64) -> Self {
        let mut tube = Self {
            x,
            gap_top: 0.0,
            speed,
            passed: false,
        };
        tube.reset(x, gap_fraction);
        tube
    }

    fn reset(&mut self, x: f64, gap_fraction: f64) {
        self.x = x;
        let free = CANVAS_HEIGHT - 2.0 * TUBE_MIN_HEIGHT - TUBE_GAP_HEIGHT;
        self.gap_top = TUBE_MIN_HEIGHT + gap_fraction.clamp(0.0, 1.0) * free;
        self.passed = false;
    }

    pub fn gap_bottom(&self) -> f64 {
        self.gap_top + TUBE_GAP_HEIGHT
    }

    pub fn gap_center(&self) -> f64 {
        self.gap_top + TUBE_GAP_HEIGHT / 2.0
    }

    fn off_screen(&self) -> bool {
        self.x < -TUBE_WIDTH
    }

    fn overlaps(&self, taco: &Taco) -> bool {
        let within_x =
            taco.x + TACO_HALF_SIZE > self.x && taco.x - TACO_HALF_SIZE < self.x + TUBE_WIDTH;
        let outside_gap =
            taco.y - TACO_HALF_SIZE < self.gap_top || taco.y + TACO_HALF_SIZE > self.gap_bottom();
        within_x && outside_gap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Playing,
    Crashed,
}

pub struct GameWorld {
    taco: Taco,
    tubes: Vec<Tube>,
    gap_cursor: usize,
    score: u32,
    ticks: u64,
    state: GameState,
}

impl GameWorld {
    pub fn new(speed: f64) -> Self {
        let mut world = Self {
            taco: Taco::new(speed),
            tubes: Vec::new(),
            gap_cursor: 0,
            score: 0,
            ticks: 0,
            state: GameState::Playing,
        };
        let tube_speed = speed * 2.0;
        for i in 0..2 {
            let fraction = world.next_gap_fraction();
            let x = CANVAS_WIDTH + TUBE_WIDTH + i as f64 * TUBE_SPACING;
            world.tubes.push(Tube::new(x, tube_speed, fraction));
        }
        world
    }

    fn next_gap_fraction(&mut self) -> f64 {
        let fraction = GAP_TABLE[self.gap_cursor % GAP_TABLE.len()];
        self.gap_cursor += 1;
        fraction
    }

    pub fn taco(&self) -> &Taco {
        &self.taco
    }

    pub fn tubes(&self) -> &[Tube] {
        &self.tubes
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn flap(&mut self) -> Option<GameEvent> {
        if self.state != GameState::Playing {
            return None;
        }
        self.taco.flap();
        Some(GameEvent::Flapped)
    }

    /// Advance one frame. Does nothing once crashed.
    pub fn tick(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        if self.state != GameState::Playing {
            return events;
        }
        self.ticks += 1;
        self.taco.update();

        for i in 0..self.tubes.len() {
            self.tubes[i].x -= self.tubes[i].speed / 16.0;

            if self.tubes[i].off_screen() {
                let fraction = self.next_gap_fraction();
                let rightmost = self
                    .tubes
                    .iter()
                    .map(|t| t.x)
                    .fold(CANVAS_WIDTH, f64::max);
                self.tubes[i].reset(rightmost + TUBE_SPACING, fraction);
            }

            let tube = &mut self.tubes[i];
            if !tube.passed && tube.x + TUBE_WIDTH < self.taco.x - TACO_HALF_SIZE {
                tube.passed = true;
                self.score += 1;
                events.push(GameEvent::Passed);
            }
        }

        let hit_ground = self.taco.y + TACO_HALF_SIZE >= CANVAS_HEIGHT;
        if hit_ground || self.tubes.iter().any(|t| t.overlaps(&self.taco)) {
            self.state = GameState::Crashed;
            events.push(GameEvent::Crashed);
        }
        events
    }

    /// Simple pilot: flap when falling below the next gap's center.
    pub fn autopilot_wants_flap(&self) -> bool {
        let next = self
            .tubes
            .iter()
            .filter(|t| t.x + TUBE_WIDTH >= self.taco.x - TACO_HALF_SIZE)
            .min_by(|a, b| a.x.total_cmp(&b.x));
        let target = next.map(Tube::gap_center).unwrap_or(CANVAS_HEIGHT / 2.0);
        self.taco.y > target + 10.0 && self.taco.speed_y() >= 0.0
    }
}
