// Loop control - bar selection state machine and derived loop region

use super::bars::BarDescriptor;
use std::ops::RangeInclusive;

/// Subtracted from the nominal loop end so the wrap never replays audio
/// from the next bar. Smaller than one audio frame at any common rate.
pub const LOOP_END_EPSILON: f64 = 0.001;

/// Loop boundaries as consumed by the playback clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopBounds {
    pub start: f64,
    pub end: f64,
}

impl LoopBounds {
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Loop region derived from a bar selection
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRegion {
    pub active: bool,
    pub start_time: f64,
    pub end_time: f64,
    pub bar_indices: Vec<usize>,
}

impl LoopRegion {
    pub fn bounds(&self) -> LoopBounds {
        LoopBounds {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// Selection state
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Idle,
    FirstBarSelected(usize),
    /// A range is selected; `region.active` tells whether it loops
    RangeSelected(LoopRegion),
}

/// Bar-range loop selection
///
/// First click picks a bar, second click closes the range and activates the
/// loop immediately, a further click starts a new selection.
#[derive(Debug, Clone)]
pub struct LoopController {
    state: LoopState,
}

impl LoopController {
    pub fn new() -> Self {
        Self {
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Handle a click on bar `bar_index`; out-of-range indices are ignored
    pub fn handle_bar_click(&mut self, bar_index: usize, bars: &[BarDescriptor]) {
        if bar_index >= bars.len() {
            log::debug!("Ignoring click on bar {} (song has {} bars)", bar_index, bars.len());
            return;
        }

        let pending = match &self.state {
            LoopState::Idle => None,
            LoopState::FirstBarSelected(first) => Some(*first),
            // A one-bar range still waits for its closing bar
            LoopState::RangeSelected(region) if region.bar_indices.len() < 2 => {
                region.bar_indices.first().copied()
            }
            LoopState::RangeSelected(_) => None,
        };

        self.state = match pending {
            None => LoopState::FirstBarSelected(bar_index),
            Some(first) => {
                let start = first.min(bar_index);
                let end = first.max(bar_index);
                match Self::build_region(start..=end, bars, true) {
                    Some(region) => {
                        log::debug!(
                            "Loop set on bars {}..={} ({:.3}s - {:.3}s)",
                            start,
                            end,
                            region.start_time,
                            region.end_time
                        );
                        LoopState::RangeSelected(region)
                    }
                    None => {
                        log::debug!("Bar {} no longer exists, restarting selection", first);
                        LoopState::FirstBarSelected(bar_index)
                    }
                }
            }
        };
    }

    /// Flip the loop on or off; needs at least two selected bars
    pub fn toggle_loop(&mut self) -> bool {
        let selected = self.selected_bars().len();
        if let LoopState::RangeSelected(region) = &mut self.state
            && selected >= 2
        {
            region.active = !region.active;
            return region.active;
        }

        log::warn!("Cannot toggle loop: select at least 2 bars ({} selected)", selected);
        false
    }

    /// Drop any selection and deactivate the loop
    pub fn clear_loop(&mut self) {
        self.state = LoopState::Idle;
    }

    /// Recompute region times after the bar timeline changed
    ///
    /// A selection that no longer fits the bar list is cleared.
    pub fn rebind(&mut self, bars: &[BarDescriptor]) {
        let rebound = match &self.state {
            LoopState::Idle => return,
            LoopState::FirstBarSelected(bar) if *bar < bars.len() => return,
            LoopState::FirstBarSelected(_) => None,
            LoopState::RangeSelected(region) => {
                match (region.bar_indices.first(), region.bar_indices.last()) {
                    (Some(&start), Some(&end)) => Self::build_region(start..=end, bars, region.active),
                    _ => None,
                }
            }
        };

        match rebound {
            Some(region) => self.state = LoopState::RangeSelected(region),
            None => {
                log::debug!("Loop selection no longer fits the bar list, clearing");
                self.clear_loop();
            }
        }
    }

    pub fn selected_bars(&self) -> Vec<usize> {
        match &self.state {
            LoopState::Idle => Vec::new(),
            LoopState::FirstBarSelected(bar) => vec![*bar],
            LoopState::RangeSelected(region) => region.bar_indices.clone(),
        }
    }

    /// Current region, active or not
    pub fn region(&self) -> Option<&LoopRegion> {
        match &self.state {
            LoopState::RangeSelected(region) => Some(region),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.region().is_some_and(|region| region.active)
    }

    /// Bounds of the active loop, if any
    pub fn active_bounds(&self) -> Option<LoopBounds> {
        self.region()
            .filter(|region| region.active)
            .map(LoopRegion::bounds)
    }

    /// `None` when the range reaches past the end of `bars`
    fn build_region(
        range: RangeInclusive<usize>,
        bars: &[BarDescriptor],
        active: bool,
    ) -> Option<LoopRegion> {
        let start_time = bars.get(*range.start())?.start;
        let end_time = bars.get(*range.end())?.end - LOOP_END_EPSILON;
        Some(LoopRegion {
            active,
            start_time,
            end_time,
            bar_indices: range.collect(),
        })
    }
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::bars::compute_bars;
    use crate::sequencer::timeline::{Tempo, TimeSignature};

    fn bars() -> Vec<BarDescriptor> {
        compute_bars(
            &[0.0, 2000.0, 4000.0, 6000.0],
            &Tempo::try_new(120.0).unwrap(),
            &TimeSignature::four_four(),
        )
    }

    #[test]
    fn test_two_clicks_activate_loop() {
        let bars = bars();
        let mut controller = LoopController::new();

        controller.handle_bar_click(2, &bars);
        assert_eq!(controller.state(), &LoopState::FirstBarSelected(2));
        assert!(!controller.is_active());

        // Order of clicks does not matter
        controller.handle_bar_click(1, &bars);
        let region = controller.region().unwrap();
        assert!(region.active);
        assert_eq!(region.bar_indices, vec![1, 2]);
        assert_eq!(region.start_time, 2.0);
        assert!((region.end_time - (6.0 - LOOP_END_EPSILON)).abs() < 1e-12);
        assert_eq!(controller.active_bounds().unwrap().start, 2.0);
    }

    #[test]
    fn test_third_click_starts_new_selection() {
        let bars = bars();
        let mut controller = LoopController::new();
        controller.handle_bar_click(0, &bars);
        controller.handle_bar_click(3, &bars);
        assert_eq!(controller.selected_bars(), vec![0, 1, 2, 3]);

        controller.handle_bar_click(1, &bars);
        assert_eq!(controller.state(), &LoopState::FirstBarSelected(1));
        assert!(controller.active_bounds().is_none());
    }

    #[test]
    fn test_toggle_requires_two_bars() {
        let bars = bars();
        let mut controller = LoopController::new();

        assert!(!controller.toggle_loop());
        assert_eq!(controller.state(), &LoopState::Idle);

        controller.handle_bar_click(1, &bars);
        assert!(!controller.toggle_loop());
        assert_eq!(controller.state(), &LoopState::FirstBarSelected(1));

        // Same bar twice: a one-bar range that cannot be toggled
        controller.handle_bar_click(1, &bars);
        assert!(controller.is_active());
        assert!(!controller.toggle_loop());
        assert!(controller.is_active());
    }

    #[test]
    fn test_one_bar_range_extends_on_next_click() {
        let bars = bars();
        let mut controller = LoopController::new();
        controller.handle_bar_click(1, &bars);
        controller.handle_bar_click(1, &bars);
        assert_eq!(controller.selected_bars(), vec![1]);

        controller.handle_bar_click(3, &bars);
        let region = controller.region().unwrap();
        assert!(region.active);
        assert_eq!(region.bar_indices, vec![1, 2, 3]);
        assert_eq!(region.start_time, 2.0);

        // A real range again, so toggling works
        assert!(!controller.toggle_loop());
        assert!(!controller.is_active());
    }

    #[test]
    fn test_pending_bar_from_longer_song() {
        let bars = bars();
        let mut controller = LoopController::new();
        controller.handle_bar_click(3, &bars);

        // The bar list shrank under the pending selection
        controller.handle_bar_click(0, &bars[..2]);
        assert_eq!(controller.state(), &LoopState::FirstBarSelected(0));

        controller.handle_bar_click(1, &bars[..2]);
        assert_eq!(controller.selected_bars(), vec![0, 1]);
        assert!(controller.is_active());
    }

    #[test]
    fn test_toggle_flips_active_range() {
        let bars = bars();
        let mut controller = LoopController::new();
        controller.handle_bar_click(0, &bars);
        controller.handle_bar_click(1, &bars);

        assert!(!controller.toggle_loop());
        assert!(!controller.is_active());
        assert!(controller.region().is_some());
        assert!(controller.active_bounds().is_none());

        assert!(controller.toggle_loop());
        assert!(controller.is_active());
    }

    #[test]
    fn test_clear_from_any_state() {
        let bars = bars();
        let mut controller = LoopController::new();
        controller.handle_bar_click(0, &bars);
        controller.clear_loop();
        assert_eq!(controller.state(), &LoopState::Idle);

        controller.handle_bar_click(0, &bars);
        controller.handle_bar_click(2, &bars);
        controller.clear_loop();
        assert_eq!(controller.state(), &LoopState::Idle);
        assert!(controller.selected_bars().is_empty());
    }

    #[test]
    fn test_out_of_range_click_ignored() {
        let bars = bars();
        let mut controller = LoopController::new();
        controller.handle_bar_click(10, &bars);
        assert_eq!(controller.state(), &LoopState::Idle);
    }

    #[test]
    fn test_rebind_follows_new_tempo() {
        let mut controller = LoopController::new();
        controller.handle_bar_click(0, &bars());
        controller.handle_bar_click(1, &bars());

        let slower = compute_bars(
            &[0.0, 4000.0, 8000.0],
            &Tempo::try_new(60.0).unwrap(),
            &TimeSignature::four_four(),
        );
        controller.rebind(&slower);
        let region = controller.region().unwrap();
        assert!(region.active);
        assert!((region.end_time - (8.0 - LOOP_END_EPSILON)).abs() < 1e-12);

        controller.rebind(&slower[..1]);
        assert_eq!(controller.state(), &LoopState::Idle);
    }
}
