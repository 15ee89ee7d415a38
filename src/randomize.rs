//! Patch randomizer
//!
//! Each knob drifts toward a target that mixes its current position, a
//! per-parameter "sensible" position and a random offset. Boxes only move
//! when the amount is above one half. A few parameters get tuned weights so
//! that random patches tend to stay playable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::params::{ParamRole, ParameterDescriptor, ParameterStore};

pub const DEFAULT_AMOUNT: f32 = 0.2;

const PROGRAM_LEVEL: u16 = 576;
const ENV1_ATTACK: u16 = 578;
const ENV1_SUSTAIN_TIME: u16 = 582;
const ENV1_SUSTAIN_LEVEL: u16 = 583;
const ENV1_RELEASE: u16 = 584;
const PORTAMENTO_TIME: u16 = 517;
const OSC_SEMITONES: [u16; 3] = [526, 532, 538];
const OSC_FINE: [u16; 3] = [527, 533, 539];
const UNISON_DETUNE: u16 = 514;
const ANALOG_DRIFT: u16 = 519;

const SH_INPUT: u16 = 628;
const TRACKGEN_INPUT: u16 = 630;
const OSC_WAVEFORMS: [u16; 3] = [523, 529, 535];
const ENV1_LOOP: u16 = 589;
const ENV1_FREE_RUN: u16 = 588;
/// Program, bank, category and the X/Y/Z knob assignments
const NEVER_RANDOMIZED: [u16; 6] = [100, 101, 666, 411, 412, 413];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomizeSettings {
    /// 0.0..=1.0
    pub amount: f32,
    /// Keep oscillator tuning mostly intact
    pub lock_pitch: bool,
}

impl Default for RandomizeSettings {
    fn default() -> Self {
        Self {
            amount: DEFAULT_AMOUNT,
            lock_pitch: false,
        }
    }
}

/// Weights for one parameter
struct Mix {
    amt: f32,
    bias: f32,
    default: f32,
    offset: f32,
}

impl Mix {
    /// Position in 0.0..=1.0 after mixing
    fn apply(&self, current: f32) -> f32 {
        let target = (1.0 - self.bias) * current + self.bias * self.default + self.offset;
        (1.0 - self.amt) * current + self.amt * target
    }
}

pub struct Randomizer {
    rng: StdRng,
}

impl Default for Randomizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Randomizer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence, for tests and reproducible patches
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Work out new values for every knob (and boxes, for large amounts)
    ///
    /// Returns `(nrpn, value)` edits in table order; nothing is written.
    pub fn plan(&mut self, store: &ParameterStore, settings: RandomizeSettings) -> Vec<(u16, i32)> {
        let amount = settings.amount.clamp(0.0, 1.0);
        let table = store.table();
        let mut edits = Vec::new();

        for (index, d) in table.iter().enumerate() {
            if d.role != ParamRole::Knob || d.flags.meta {
                continue;
            }
            let Some(current) = store.get_by_index(index) else {
                continue;
            };
            let offset = self.offset();
            let Some(mix) = knob_mix(d, store, amount, settings.lock_pitch, offset) else {
                continue;
            };

            let position = mix.apply(d.normalize(current));
            let value = d.clamp((d.min as f32 + (d.max - d.min) as f32 * position).round() as i32);
            edits.push((d.nrpn, value));
        }

        if amount > 0.5 {
            for (index, d) in table.iter().enumerate() {
                if d.role != ParamRole::Box {
                    continue;
                }
                let Some(current) = store.get_by_index(index) else {
                    continue;
                };
                let offset = self.offset();
                if let Some(value) = box_value(d, current, amount, offset) {
                    edits.push((d.nrpn, value));
                }
            }
        }

        debug!("Randomize planned {} edits (amount {:.2})", edits.len(), amount);
        edits
    }

    fn offset(&mut self) -> f32 {
        2.0 * self.rng.gen::<f32>() - 1.0
    }
}

fn knob_mix(
    d: &ParameterDescriptor,
    store: &ParameterStore,
    amount: f32,
    lock_pitch: bool,
    offset: f32,
) -> Option<Mix> {
    let mut mix = Mix {
        amt: 0.5 * amount,
        bias: 0.8 * amount,
        default: 0.5,
        offset,
    };
    let strong_bias = 0.5 + 0.5 * amount;

    match d.nrpn {
        PROGRAM_LEVEL => {
            mix.amt *= 0.5;
            mix.offset *= 0.5;
            mix.default = 0.75;
        }
        ENV1_ATTACK => {
            mix.default = 0.3;
            mix.amt *= 0.7;
        }
        ENV1_SUSTAIN_TIME => {
            mix.default = 1.0;
            mix.amt *= 0.7;
            mix.bias = strong_bias;
        }
        ENV1_SUSTAIN_LEVEL => {
            mix.default = 0.8;
            mix.amt *= 0.7;
        }
        ENV1_RELEASE => {
            mix.default = 0.6;
            mix.amt *= 0.7;
        }
        PORTAMENTO_TIME => {
            mix.default = 0.1;
            mix.amt *= 0.7;
        }
        n if OSC_SEMITONES.contains(&n) && lock_pitch => return None,
        n if OSC_SEMITONES.contains(&n) || n == UNISON_DETUNE || n == ANALOG_DRIFT => {
            mix.default = 0.0;
            if lock_pitch {
                mix.amt *= 0.7;
                mix.bias = strong_bias;
            }
        }
        n if OSC_FINE.contains(&n) => {
            if lock_pitch {
                mix.amt *= 0.5;
                mix.offset *= 0.5;
                mix.bias = strong_bias;
            }
        }
        _ if d.flags.mod_level || d.flags.mod_offset => {
            if let Some(label) = mod_destination_label(d.nrpn, store) {
                if lock_pitch && label.contains("Nar") {
                    mix.amt *= 0.25;
                    mix.offset *= 0.5;
                    mix.bias = 1.0;
                } else if lock_pitch && label.contains("Pit") {
                    mix.amt *= 0.1;
                    mix.offset *= 0.1;
                    mix.bias = 1.0;
                } else if label.contains("PgmLvl") {
                    mix.amt *= 0.5;
                    mix.offset *= 0.5;
                    mix.bias = 1.0;
                } else if label.contains("Pan") {
                    mix.amt *= 0.5;
                    mix.bias = strong_bias;
                }
            }
        }
        _ => {}
    }
    Some(mix)
}

/// Label currently selected in the destination box of a mod slot
fn mod_destination_label(nrpn: u16, store: &ParameterStore) -> Option<String> {
    let destination = (nrpn & 0xFFFC) + 1;
    let d = store.table().by_nrpn(destination)?;
    let value = store.get(destination)?;
    d.label(value).map(str::to_string)
}

fn box_value(d: &ParameterDescriptor, current: i32, amount: f32, offset: f32) -> Option<i32> {
    if NEVER_RANDOMIZED.contains(&d.nrpn) {
        return None;
    }

    let items = d.num_steps() as f32;
    let selected = current - d.min;
    let matrix = d.flags.matrix_source || d.flags.matrix_dest;
    // An empty matrix slot stays empty
    if matrix && selected == 0 {
        return None;
    }

    let mut amt = 2.0 * (amount - 0.5);
    amt *= amt;
    let mut mix = Mix {
        amt: amt * 0.5,
        bias: 0.25 * amt,
        default: 0.5,
        offset,
    };

    if d.flags.matrix_source || d.nrpn == SH_INPUT || d.nrpn == TRACKGEN_INPUT {
        mix.amt *= 0.4;
        mix.offset *= 0.4;
        mix.default = 0.0;
        mix.bias *= 1.5;
    } else if d.flags.matrix_dest {
        mix.offset *= 0.5;
    } else if OSC_WAVEFORMS.contains(&d.nrpn) {
        mix.amt *= 2.0;
        mix.offset *= 2.0;
    } else if d.nrpn == ENV1_LOOP || d.nrpn == ENV1_FREE_RUN {
        mix.amt *= 0.5;
    }

    let position = mix.apply(selected as f32 / items);
    let mut index = ((position * items).round() as i32).max(0);
    if matrix {
        index = index.max(1);
    }
    index = index.min(d.num_steps() as i32 - 1);
    Some(d.min + index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::default_table;
    use std::sync::Arc;

    fn store() -> ParameterStore {
        ParameterStore::new(default_table().unwrap())
    }

    fn apply(store: &ParameterStore, edits: &[(u16, i32)]) {
        for &(nrpn, value) in edits {
            store.set(nrpn, value).unwrap();
        }
    }

    #[test]
    fn test_zero_amount_changes_nothing() {
        let store = store();
        let before = store.values();
        let edits = Randomizer::seeded(1).plan(
            &store,
            RandomizeSettings {
                amount: 0.0,
                lock_pitch: false,
            },
        );
        apply(&store, &edits);
        assert_eq!(store.values(), before);
    }

    #[test]
    fn test_small_amount_leaves_boxes_and_buttons() {
        let store = store();
        let table = store.table().clone();
        let edits = Randomizer::seeded(7).plan(&store, RandomizeSettings::default());
        for (nrpn, _) in &edits {
            assert_eq!(table.by_nrpn(*nrpn).unwrap().role, ParamRole::Knob);
        }
    }

    #[test]
    fn test_values_stay_in_range() {
        let store = store();
        let table = store.table().clone();
        let mut randomizer = Randomizer::seeded(42);
        for _ in 0..20 {
            let edits = randomizer.plan(
                &store,
                RandomizeSettings {
                    amount: 1.0,
                    lock_pitch: false,
                },
            );
            for &(nrpn, value) in &edits {
                assert!(table.by_nrpn(nrpn).unwrap().contains(value));
            }
            apply(&store, &edits);
        }
    }

    #[test]
    fn test_lock_pitch_skips_semitones() {
        let store = store();
        let edits = Randomizer::seeded(3).plan(
            &store,
            RandomizeSettings {
                amount: 1.0,
                lock_pitch: true,
            },
        );
        for (nrpn, _) in &edits {
            assert!(!OSC_SEMITONES.contains(nrpn));
        }
    }

    #[test]
    fn test_matrix_slots_never_become_none() {
        let store = Arc::new(store());
        let table = store.table().clone();
        let mut randomizer = Randomizer::seeded(11);
        let settings = RandomizeSettings {
            amount: 1.0,
            lock_pitch: false,
        };

        let empty_before: Vec<u16> = table
            .iter()
            .filter(|d| (d.flags.matrix_source || d.flags.matrix_dest) && store.get(d.nrpn) == Some(d.min))
            .map(|d| d.nrpn)
            .collect();

        for _ in 0..10 {
            let edits = randomizer.plan(&store, settings);
            for &(nrpn, value) in &edits {
                let d = table.by_nrpn(nrpn).unwrap();
                if d.flags.matrix_source || d.flags.matrix_dest {
                    assert!(!empty_before.contains(&nrpn));
                    assert!(value > d.min);
                }
            }
            apply(&store, &edits);
        }
    }

    #[test]
    fn test_skipped_boxes() {
        let store = store();
        let edits = Randomizer::seeded(5).plan(
            &store,
            RandomizeSettings {
                amount: 1.0,
                lock_pitch: false,
            },
        );
        for (nrpn, _) in &edits {
            assert!(!NEVER_RANDOMIZED.contains(nrpn));
        }
    }

    #[test]
    fn test_same_seed_same_plan() {
        let store = store();
        let settings = RandomizeSettings {
            amount: 0.8,
            lock_pitch: false,
        };
        let a = Randomizer::seeded(99).plan(&store, settings);
        let b = Randomizer::seeded(99).plan(&store, settings);
        assert_eq!(a, b);
    }
}
