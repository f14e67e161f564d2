//! Seven-state per-operator amplitude envelope (spec §4.2).
//!
//! Ticks advance once per control-tick (~every 8 samples, see
//! [`crate::sequencer::player`]), not once per sample — the envelope is one
//! of the "slow" per-channel updates the render loop runs at 1/8th rate.

/// The envelope's state machine. `Idle`/`Delay`/.../`Release` map directly
/// to the source's states 0..6; the `envCount = 99999999` "re-delay from
/// sustain" sentinel is represented as [`Envelope`]'s internal
/// `loop_from_sustain` flag rather than a magic tick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Delay,
    Attack,
    Hold,
    DecayToSustain,
    Sustain,
    Release,
}

/// Per-note ADHSR coefficients, already scaled by keyboard tracking and
/// sample rate (spec §4.2's `a`/`d` formulas, `delay`/`h` tick counts).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnvelopeParams {
    pub delay_ticks: f32,
    pub a: f32,
    pub hold_ticks: f32,
    pub d: f32,
    pub s: f32,
    /// Release multiplier; `<= 1.0` decays toward 0, `> 1.0` grows toward 1
    /// (an "inverted" release, spec §4.2).
    pub r: f32,
    pub initial: f32,
    pub env_loop: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    state: EnvelopeState,
    value: f32,
    tick_count: f32,
    loop_from_sustain: bool,
    params: EnvelopeParams,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            state: EnvelopeState::Idle,
            value: 0.0,
            tick_count: 0.0,
            loop_from_sustain: false,
            params: EnvelopeParams::default(),
        }
    }
}

impl Envelope {
    /// Arms the envelope for a new note. `env_reset` mirrors the
    /// instrument's `envReset` flag: when false the envelope continues from
    /// its current value instead of snapping to 0 (used for legato/smooth
    /// instruments that don't want a fresh attack ramp from silence).
    pub fn note_on(&mut self, params: EnvelopeParams, env_reset: bool) {
        self.params = params;
        self.tick_count = 0.0;
        self.loop_from_sustain = false;
        if env_reset {
            self.value = 0.0;
        }
        self.state = EnvelopeState::Delay;
    }

    pub fn note_off(&mut self) {
        self.state = EnvelopeState::Release;
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn is_idle(&self) -> bool {
        self.state == EnvelopeState::Idle
    }

    fn enter_post_attack(&mut self) {
        self.value = 1.0;
        self.state = if self.params.hold_ticks > 0.0 {
            EnvelopeState::Hold
        } else {
            EnvelopeState::DecayToSustain
        };
    }

    /// Advances one control-tick and returns the new envelope value.
    pub fn tick(&mut self) -> f32 {
        match self.state {
            EnvelopeState::Idle => {}
            EnvelopeState::Delay => {
                self.tick_count += 1.0;
                if self.tick_count >= self.params.delay_ticks {
                    self.value = if self.loop_from_sustain {
                        self.params.s
                    } else {
                        self.params.initial
                    };
                    self.value += (1.4 - self.value) * self.params.a;
                    if self.value >= 1.0 {
                        self.enter_post_attack();
                    } else {
                        self.state = EnvelopeState::Attack;
                    }
                }
            }
            EnvelopeState::Attack => {
                self.value += (1.4 - self.value) * self.params.a;
                if self.value >= 1.0 {
                    self.enter_post_attack();
                }
            }
            EnvelopeState::Hold => {
                self.tick_count += 1.0;
                if self.tick_count >= self.params.hold_ticks {
                    self.state = EnvelopeState::DecayToSustain;
                }
            }
            EnvelopeState::DecayToSustain => {
                self.value -= (self.value - self.params.s) * self.params.d;
                if self.value - self.params.s < 0.001 {
                    self.value = self.params.s;
                    if self.params.s < 0.001 && !self.params.env_loop {
                        self.value = 0.0;
                        self.state = EnvelopeState::Idle;
                    } else if self.params.env_loop {
                        self.loop_from_sustain = true;
                        self.tick_count = 0.0;
                        self.state = EnvelopeState::Delay;
                    } else {
                        self.state = EnvelopeState::Sustain;
                    }
                }
            }
            EnvelopeState::Sustain => {}
            EnvelopeState::Release => {
                self.value *= self.params.r;
                if self.params.r <= 1.0 {
                    if self.value < 0.001 {
                        self.value = 0.0;
                        self.state = EnvelopeState::Idle;
                    }
                } else if self.value >= 1.0 {
                    self.value = 1.0;
                    self.state = EnvelopeState::Sustain;
                }
            }
        }
        self.value
    }
}
