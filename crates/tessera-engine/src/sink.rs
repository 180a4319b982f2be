//! Side-effect sink contract.
//!
//! The engine never performs externally visible work itself. After each
//! tick it hands the ordered side effects to whatever the surrounding loop
//! plugs in here (audio, visuals, network, a test recorder).

use std::time::Duration;

/// Receiver of the side effects emitted by each tick.
pub trait EffectSink<X> {
    /// Consume the effects of the tick that ran at `clock`, in order.
    fn consume(&mut self, clock: Duration, effects: Vec<X>);
}

/// Collects every effect, dropping the tick boundaries.
impl<X> EffectSink<X> for Vec<X> {
    fn consume(&mut self, _clock: Duration, effects: Vec<X>) {
        self.extend(effects);
    }
}

/// Keeps the effects of each tick together with the tick's clock.
#[derive(Debug, Clone)]
pub struct TimedEffects<X> {
    /// `(clock, effects)` for every tick that emitted at least one effect.
    pub ticks: Vec<(Duration, Vec<X>)>,
}

impl<X> TimedEffects<X> {
    /// An empty recorder.
    pub fn new() -> Self {
        Self { ticks: Vec::new() }
    }

    /// All recorded effects in order, without clocks.
    pub fn flattened(&self) -> impl Iterator<Item = &X> + '_ {
        self.ticks.iter().flat_map(|(_, effects)| effects.iter())
    }
}

impl<X> Default for TimedEffects<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X> EffectSink<X> for TimedEffects<X> {
    fn consume(&mut self, clock: Duration, effects: Vec<X>) {
        if !effects.is_empty() {
            self.ticks.push((clock, effects));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_effects_skip_silent_ticks() {
        let mut sink = TimedEffects::new();
        sink.consume(Duration::from_millis(0), vec!['a', 'b']);
        sink.consume(Duration::from_millis(10), vec![]);
        sink.consume(Duration::from_millis(20), vec!['c']);

        assert_eq!(sink.ticks.len(), 2);
        assert_eq!(sink.ticks[1].0, Duration::from_millis(20));
        assert_eq!(sink.flattened().collect::<String>(), "abc");
    }
}
