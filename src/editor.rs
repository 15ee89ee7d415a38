//! Editor model
//!
//! Everything an editor front end needs besides drawing: the list of
//! controls, edit gestures, the poll cycle, undo/redo and the randomizer.
//! Front ends call [`EditorModel::poll`] periodically and redraw the controls
//! it reports as changed.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::history::{History, Snapshot};
use crate::params::{ParamRole, PROGRAM_NAME_LEN};
use crate::randomize::{RandomizeSettings, Randomizer};
use crate::sync::SyncEngine;

/// Default poll period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tracking generator preset selector
pub const TRACKING_PRESET_NRPN: u16 = 631;
/// Tracking generator point count (12 or 16)
pub const TRACKING_POINTS_NRPN: u16 = 632;
/// The 33 tracking generator points
pub const TRACKING_POINT_NRPNS: RangeInclusive<u16> = 633..=665;

/// Value a fill preset writes to every tracking point
///
/// Presets 7, 8 and 9 are zero, max and min. The others leave the points
/// alone.
pub fn tracking_fill(preset: i32) -> Option<i32> {
    match preset {
        7 => Some(0),
        8 => Some(100),
        9 => Some(-100),
        _ => None,
    }
}

/// One editable control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub role: ParamRole,
    pub nrpn: u16,
}

/// What one poll cycle found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Host indices whose value changed since the previous poll
    pub changed: Vec<usize>,
    /// A Program Change arrived and a dump was requested
    pub resync_requested: bool,
    /// A freshly applied patch was recorded as an undo step
    pub snapshot_taken: bool,
}

impl PollOutcome {
    pub fn is_idle(&self) -> bool {
        self.changed.is_empty() && !self.resync_requested && !self.snapshot_taken
    }
}

pub struct EditorModel {
    engine: Arc<SyncEngine>,
    controls: Vec<Control>,
    history: History,
    randomizer: Randomizer,
    settings: RandomizeSettings,
}

impl EditorModel {
    pub fn new(engine: Arc<SyncEngine>, history_limit: usize) -> Self {
        Self::with_randomizer(engine, history_limit, Randomizer::new())
    }

    pub fn with_randomizer(engine: Arc<SyncEngine>, history_limit: usize, randomizer: Randomizer) -> Self {
        let controls = engine
            .store()
            .table()
            .iter()
            .map(|d| Control {
                role: d.role,
                nrpn: d.nrpn,
            })
            .collect();

        Self {
            engine,
            controls,
            history: History::new(history_limit),
            randomizer,
            settings: RandomizeSettings::default(),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Controls in registration (table) order
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn randomize_settings(&self) -> RandomizeSettings {
        self.settings
    }

    pub fn set_randomize_amount(&mut self, amount: f32) {
        self.settings.amount = amount.clamp(0.0, 1.0);
    }

    pub fn set_lock_pitch(&mut self, lock: bool) {
        self.settings.lock_pitch = lock;
    }

    /// One cycle: service a pending resync, collect changes, record a
    /// snapshot when a new patch has just been applied
    pub fn poll(&mut self) -> PollOutcome {
        let resync_requested = self.engine.poll_resync();
        let changed = self.engine.store().take_changed();
        let snapshot_taken = self.engine.take_baseline() && self.take_snapshot();

        if snapshot_taken {
            debug!("Baseline snapshot recorded");
        }
        PollOutcome {
            changed,
            resync_requested,
            snapshot_taken,
        }
    }

    /// Discrete edit (typed value, box selection): one undo step
    pub fn edit(&mut self, nrpn: u16, value: i32) -> Result<i32> {
        let stored = self.engine.edit(nrpn, value)?;
        if nrpn == TRACKING_PRESET_NRPN || nrpn == TRACKING_POINTS_NRPN {
            self.apply_tracking_preset();
        }
        self.take_snapshot();
        Ok(stored)
    }

    /// Fill the tracking points from the selected preset
    ///
    /// Returns the number of points written.
    fn apply_tracking_preset(&mut self) -> usize {
        let Some(preset) = self.engine.store().get(TRACKING_PRESET_NRPN) else {
            return 0;
        };
        let Some(fill) = tracking_fill(preset) else {
            return 0;
        };

        let mut written = 0;
        for nrpn in TRACKING_POINT_NRPNS {
            match self.engine.edit(nrpn, fill) {
                Ok(_) => written += 1,
                Err(e) => debug!("Tracking point {} skipped: {}", nrpn, e),
            }
        }
        debug!("Tracking preset {} set {} points to {}", preset, written, fill);
        written
    }

    /// Continuous edit during a gesture; no undo step until [`release`](Self::release)
    pub fn drag(&mut self, nrpn: u16, value: i32) -> Result<i32> {
        self.engine.edit(nrpn, value)
    }

    /// Gesture ended
    pub fn release(&mut self) -> bool {
        self.take_snapshot()
    }

    /// Flip a two-state control between its bounds
    pub fn toggle(&mut self, nrpn: u16) -> Result<i32> {
        let store = self.engine.store();
        let descriptor = store.table().by_nrpn(nrpn).ok_or(SyncError::UnknownNrpn(nrpn))?;
        let (min, max) = (descriptor.min, descriptor.max);
        let current = store.get(nrpn).ok_or(SyncError::UnknownNrpn(nrpn))?;

        let next = if current == min { max } else { min };
        self.edit(nrpn, next)
    }

    /// Update the name while typing; returns the stored (truncated) name
    pub fn set_program_name(&mut self, name: &str) -> String {
        self.engine.store().set_program_name(name)
    }

    /// Typing finished
    pub fn commit_program_name(&mut self) -> bool {
        self.take_snapshot()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo().cloned() {
            Some(snapshot) => {
                self.restore(&snapshot);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo().cloned() {
            Some(snapshot) => {
                self.restore(&snapshot);
                true
            }
            None => false,
        }
    }

    /// Randomize the patch as a single undo step; returns the number of edits
    pub fn randomize(&mut self) -> usize {
        let edits = self.randomizer.plan(self.engine.store(), self.settings);
        {
            let _hold = self.history.gate().hold();
            for &(nrpn, value) in &edits {
                if let Err(e) = self.engine.edit(nrpn, value) {
                    debug!("Randomize skipped NRPN {}: {}", nrpn, e);
                }
            }
        }
        self.take_snapshot();
        info!("Randomized {} parameters", edits.len());
        edits.len()
    }

    /// Record the current state as an undo step
    pub fn take_snapshot(&mut self) -> bool {
        let snapshot = self.capture();
        self.history.snapshot(snapshot)
    }

    /// Current state in snapshot form
    pub fn capture(&self) -> Snapshot {
        let store = self.engine.store();
        let mut snapshot = Snapshot {
            program_name: store.program_name(),
            ..Default::default()
        };

        for control in &self.controls {
            let Some(descriptor) = store.table().by_nrpn(control.nrpn) else {
                continue;
            };
            let value = store.get(control.nrpn).unwrap_or(descriptor.default);
            match control.role {
                ParamRole::Knob => snapshot.slider_values.push(value),
                ParamRole::Box => snapshot.box_values.push(value - descriptor.min),
                ParamRole::Button => snapshot.button_values.push(value != descriptor.min),
            }
        }
        snapshot
    }

    /// Drive every control back to a snapshot without recording new steps
    fn restore(&mut self, snapshot: &Snapshot) {
        let _hold = self.history.gate().hold();
        let store = self.engine.store().clone();

        let name: String = snapshot.program_name.chars().take(PROGRAM_NAME_LEN).collect();
        store.set_program_name(&name);

        let mut sliders = snapshot.slider_values.iter();
        let mut boxes = snapshot.box_values.iter();
        let mut buttons = snapshot.button_values.iter();

        for control in &self.controls {
            let Some(descriptor) = store.table().by_nrpn(control.nrpn) else {
                continue;
            };
            let target = match control.role {
                ParamRole::Knob => sliders.next().copied(),
                ParamRole::Box => boxes.next().map(|offset| descriptor.min + offset),
                ParamRole::Button => buttons
                    .next()
                    .map(|&on| if on { descriptor.max } else { descriptor.min }),
            };
            let Some(target) = target else {
                continue;
            };
            if store.get(control.nrpn) != Some(target) {
                if let Err(e) = self.engine.edit(control.nrpn, target) {
                    debug!("Restore skipped NRPN {}: {}", control.nrpn, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sysex::{encode_patch, SysexFraming};
    use crate::params::{default_table, ParameterStore};
    use crate::port::{MemoryBackend, PortDirection};

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn editor() -> (EditorModel, MemoryBackend) {
        let backend = MemoryBackend::new(["Micron"], ["Micron"]);
        let store = Arc::new(ParameterStore::new(default_table().unwrap()));
        let engine = Arc::new(SyncEngine::new(
            store,
            Arc::new(backend.clone()),
            SysexFraming::default(),
            4096,
        ));
        (EditorModel::with_randomizer(engine, 100, Randomizer::seeded(1)), backend)
    }

    #[test]
    fn test_controls_follow_table_order() {
        let (editor, _) = editor();
        let table = editor.engine().store().table().clone();
        assert_eq!(editor.controls().len(), table.len());
        for (control, descriptor) in editor.controls().iter().zip(table.iter()) {
            assert_eq!(control.nrpn, descriptor.nrpn);
            assert_eq!(control.role, descriptor.role);
        }
    }

    #[test]
    fn test_tracking_fill_presets_set_every_point() {
        let (mut editor, backend) = editor();
        editor.engine().select_port(PortDirection::Output, "Micron").unwrap();
        editor.take_snapshot();

        for (preset, expected) in [(8, 100), (9, -100), (7, 0)] {
            editor.edit(TRACKING_PRESET_NRPN, preset).unwrap();
            for nrpn in TRACKING_POINT_NRPNS {
                assert_eq!(editor.engine().store().get(nrpn), Some(expected), "point {}", nrpn);
            }
        }
        // Selector plus 33 points, three times
        let groups = 3 * (1 + TRACKING_POINT_NRPNS.count());
        assert!(wait_for(|| backend.sent_to("Micron").len() == groups * 4));

        // Each fill is one undo step together with the selector change
        assert!(editor.undo());
        assert_eq!(editor.engine().store().get(TRACKING_PRESET_NRPN), Some(9));
        assert_eq!(editor.engine().store().get(640), Some(-100));
    }

    #[test]
    fn test_other_tracking_presets_keep_points() {
        let (mut editor, _) = editor();
        editor.drag(640, 42).unwrap();
        for preset in [0, 1, 6] {
            editor.edit(TRACKING_PRESET_NRPN, preset).unwrap();
            assert_eq!(editor.engine().store().get(640), Some(42));
        }
        editor.edit(TRACKING_POINTS_NRPN, 1).unwrap();
        assert_eq!(editor.engine().store().get(640), Some(42));
    }

    #[test]
    fn test_drag_records_one_step_on_release() {
        let (mut editor, _) = editor();
        editor.take_snapshot();
        for v in 10..20 {
            editor.drag(583, v).unwrap();
        }
        assert_eq!(editor.history().len(), 1);
        editor.release();
        assert_eq!(editor.history().len(), 2);
    }

    #[test]
    fn test_undo_restores_values() {
        let (mut editor, _) = editor();
        editor.take_snapshot();
        editor.edit(800, 3).unwrap();
        editor.edit(800, 5).unwrap();
        editor.toggle(512).unwrap();
        assert_eq!(editor.engine().store().get(512), Some(0));

        assert!(editor.undo());
        assert_eq!(editor.engine().store().get(512), Some(1));
        assert_eq!(editor.engine().store().get(800), Some(5));
        assert!(editor.undo());
        assert_eq!(editor.engine().store().get(800), Some(3));
        assert!(editor.redo());
        assert_eq!(editor.engine().store().get(800), Some(5));

        // Restoring never adds steps
        assert_eq!(editor.history().len(), 4);
    }

    #[test]
    fn test_undo_sends_restored_values() {
        let (mut editor, backend) = editor();
        editor.engine().select_port(PortDirection::Output, "Micron").unwrap();
        editor.take_snapshot();
        editor.edit(800, 3).unwrap();
        let wait_for_sent = |count: usize| {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while backend.sent_to("Micron").len() < count && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        };
        wait_for_sent(4);
        backend.clear_sent();

        editor.undo();
        wait_for_sent(4);
        let sent = backend.sent_to("Micron");
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3][2], 0);
    }

    #[test]
    fn test_program_name_commit() {
        let (mut editor, _) = editor();
        editor.take_snapshot();
        assert_eq!(editor.set_program_name("Sixteen chars!!!"), "Sixteen chars!");
        assert_eq!(editor.history().len(), 1);
        editor.commit_program_name();
        editor.set_program_name("Other");
        editor.commit_program_name();

        editor.undo();
        assert_eq!(editor.engine().store().program_name(), "Sixteen chars!");
    }

    #[test]
    fn test_randomize_is_one_step() {
        let (mut editor, _) = editor();
        editor.take_snapshot();
        editor.set_randomize_amount(1.0);
        let edits = editor.randomize();
        assert!(edits > 0);
        assert_eq!(editor.history().len(), 2);
        assert!(editor.undo());
        assert_eq!(editor.capture(), *editor.history().current().unwrap());
    }

    #[test]
    fn test_poll_takes_snapshot_after_dump() {
        let (mut editor, _) = editor();
        assert!(editor.poll().is_idle());

        let device = ParameterStore::new(default_table().unwrap());
        device.set(800, 6).unwrap();
        let dump = encode_patch(&device, &SysexFraming::default());
        editor.engine().init_from_sysex(&dump).unwrap();

        let outcome = editor.poll();
        assert!(outcome.snapshot_taken);
        assert!(outcome.changed.contains(&editor.engine().store().index_of_nrpn(800).unwrap()));
        assert_eq!(editor.history().len(), 1);

        let outcome = editor.poll();
        assert!(outcome.is_idle());
    }
}
