use std::time::{Duration, Instant};

/// Per-tick timing handed to every update callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime {
    pub frame: u64,
    pub delta: f32,
    pub elapsed: f32,
}

impl FrameTime {
    pub fn new(frame: u64, delta: f32, elapsed: f32) -> Self {
        Self { frame, delta, elapsed }
    }
}

pub struct FrameClock {
    start: Instant,
    last: Instant,
    frame: u64,
    elapsed: f32,
    pub delta: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, frame: 0, elapsed: 0.0, delta: Duration::from_secs_f32(0.0) }
    }

    /// Advances using wall-clock time since the previous tick.
    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
        self.elapsed = self.last.duration_since(self.start).as_secs_f32();
        let delta = self.delta_seconds();
        self.advance(delta)
    }

    /// Advances by a fixed step regardless of wall-clock time.
    pub fn step(&mut self, dt: f32) -> FrameTime {
        let dt = dt.max(0.0);
        self.delta = Duration::from_secs_f32(dt);
        self.elapsed += dt;
        self.advance(dt)
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn advance(&mut self, delta: f32) -> FrameTime {
        self.frame += 1;
        FrameTime { frame: self.frame, delta, elapsed: self.elapsed }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
