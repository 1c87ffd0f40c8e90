//! A collection of `Audio` models, each tagged with the channel/velocity/note it was
//! sampled at, plus nearest-match lookup used by the live decoder to pick a source for
//! an incoming note-on.

use crate::block::Audio;

#[derive(Clone, Debug)]
pub struct WavSetWave {
    pub midi_note: i32,
    pub channel: i32,
    pub velocity: i32,
    pub audio: Audio,
}

#[derive(Clone, Debug, Default)]
pub struct WavSet {
    pub waves: Vec<WavSetWave>,
}

impl WavSet {
    pub fn new() -> WavSet {
        WavSet { waves: Vec::new() }
    }

    pub fn add_wave(&mut self, wave: WavSetWave) {
        self.waves.push(wave);
    }

    /// Finds the wave whose `(channel, velocity, midi_note)` is closest to the request,
    /// preferring an exact channel match, then nearest velocity, then nearest note.
    pub fn find_wave(&self, channel: i32, velocity: i32, midi_note: i32) -> Option<&WavSetWave> {
        self.waves
            .iter()
            .filter(|w| w.channel == channel || w.channel < 0)
            .min_by_key(|w| {
                let velocity_dist = (w.velocity - velocity).abs();
                let note_dist = (w.midi_note - midi_note).abs();
                (velocity_dist, note_dist)
            })
            .or_else(|| {
                self.waves
                    .iter()
                    .min_by_key(|w| (w.velocity - velocity).abs() + (w.midi_note - midi_note).abs())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(note: i32, vel: i32) -> WavSetWave {
        WavSetWave {
            midi_note: note,
            channel: 0,
            velocity: vel,
            audio: Audio::default(),
        }
    }

    #[test]
    fn finds_nearest_note_at_same_velocity() {
        let mut set = WavSet::new();
        set.add_wave(wave(60, 100));
        set.add_wave(wave(72, 100));
        let found = set.find_wave(0, 100, 70).unwrap();
        assert_eq!(found.midi_note, 72);
    }

    #[test]
    fn empty_set_returns_none() {
        let set = WavSet::new();
        assert!(set.find_wave(0, 100, 60).is_none());
    }

    #[test]
    fn prefers_matching_channel() {
        let mut set = WavSet::new();
        set.waves.push(WavSetWave { midi_note: 60, channel: 1, velocity: 100, audio: Audio::default() });
        set.waves.push(WavSetWave { midi_note: 60, channel: 0, velocity: 100, audio: Audio::default() });
        let found = set.find_wave(0, 100, 60).unwrap();
        assert_eq!(found.channel, 0);
    }
}
