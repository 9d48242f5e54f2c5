//! Scenario catalogs: immutable label → generation parameter tables.
//!
//! Every scenario carries two windows: index 0 is the previous period,
//! index 1 the recent one.

use crate::error::{Result, SeedError};

/// CGM readings for one window.
///
/// `usage_pct` of the day's 5-minute slots carry a reading. Of those,
/// `tir_pct` take `first_value` and the rest take `second_value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgmWindow {
    pub first_value: f64,
    pub second_value: f64,
    pub usage_pct: f64,
    pub tir_pct: f64,
}

impl CgmWindow {
    pub const fn new(first_value: f64, second_value: f64, usage_pct: f64, tir_pct: f64) -> Self {
        Self { first_value, second_value, usage_pct, tir_pct }
    }
}

/// Finger-stick readings for one window: `readings_per_day` readings a day
/// whose mean is `average`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmbgWindow {
    pub average: f64,
    pub readings_per_day: usize,
}

/// Low and high finger-stick events across a whole window, on top of one
/// in-range reading a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowHighWindow {
    pub low_count: usize,
    pub high_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioParams {
    Cgm([CgmWindow; 2]),
    Smbg([SmbgWindow; 2]),
    LowHigh([LowHighWindow; 2]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub label: String,
    pub params: ScenarioParams,
}

impl Scenario {
    pub fn cgm(label: &str, previous: CgmWindow, recent: CgmWindow) -> Self {
        Self { label: label.to_string(), params: ScenarioParams::Cgm([previous, recent]) }
    }

    pub fn smbg(label: &str, average: f64, readings_per_day: usize) -> Self {
        let w = SmbgWindow { average, readings_per_day };
        Self { label: label.to_string(), params: ScenarioParams::Smbg([w, w]) }
    }

    pub fn low_high(label: &str, low_count: usize, high_count: usize) -> Self {
        let w = LowHighWindow { low_count, high_count };
        Self { label: label.to_string(), params: ScenarioParams::LowHigh([w, w]) }
    }
}

/// Ordered, immutable set of scenarios with unique labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioCatalog {
    scenarios: Vec<Scenario>,
}

impl ScenarioCatalog {
    pub fn new(scenarios: Vec<Scenario>) -> Result<Self> {
        for (i, s) in scenarios.iter().enumerate() {
            if scenarios[..i].iter().any(|o| o.label == s.label) {
                return Err(SeedError::InvalidInput(format!("duplicate scenario label {:?}", s.label)));
            }
            if let ScenarioParams::Smbg(ws) = &s.params {
                if ws.iter().any(|w| w.readings_per_day == 0) {
                    return Err(SeedError::InvalidInput(format!(
                        "scenario {:?} needs at least one reading per day",
                        s.label
                    )));
                }
            }
        }
        Ok(Self { scenarios })
    }

    pub fn get(&self, label: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.label == label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.scenarios.iter().map(|s| s.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// CGM dashboard categories.
    pub fn cgm_default() -> Self {
        let same = |label: &str, w: CgmWindow| Scenario::cgm(label, w, w);
        Self {
            scenarios: vec![
                same("Time below 3.0 mmol/L > 1%", CgmWindow::new(2.9, 3.0, 69.0, 5.0)),
                same("Time below 3.9 mmol/L > 4%", CgmWindow::new(3.8, 3.9, 70.0, 5.0)),
                Scenario::cgm(
                    "Drop in Time in Range > 15%",
                    CgmWindow::new(10.1, 3.9, 80.0, 1.0),
                    CgmWindow::new(10.1, 3.9, 80.0, 25.0),
                ),
                same("Time in Range < 70%", CgmWindow::new(10.0, 10.1, 80.0, 5.0)),
                same("CGM Wear Time < 70%", CgmWindow::new(3.8, 3.9, 69.0, 1.0)),
                same("Meeting Targets", CgmWindow::new(3.8, 3.9, 75.0, 1.0)),
            ],
        }
    }

    /// SMBG dashboard categories by daily reading count and average.
    pub fn smbg_default() -> Self {
        Self {
            scenarios: vec![
                Scenario::smbg("1 reading per day, average 2.9 mmol/l", 2.9, 1),
                Scenario::smbg("5 readings per day, average 3.8 mmol/l", 3.8, 5),
                Scenario::smbg("10 readings per day, average 3.9 mmol/l", 3.9, 10),
                Scenario::smbg("15 readings per day, average 10.1 mmol/l", 10.1, 15),
                Scenario::smbg("100 readings per day, average 14.0 mmol/l", 14.0, 100),
                Scenario::smbg("200 readings per day, average 19.5 mmol/l", 19.5, 200),
            ],
        }
    }

    /// SMBG categories by number of low and high events per window.
    pub fn low_high_default() -> Self {
        Self {
            scenarios: vec![
                Scenario::low_high("1 low, 1 high", 1, 1),
                Scenario::low_high("5 low, 0 high", 5, 0),
                Scenario::low_high("0 low, 10 high", 0, 10),
                Scenario::low_high("15 low, 15 high", 15, 15),
                Scenario::low_high("100 low, 100 high", 100, 100),
                Scenario::low_high("0 low, 0 high", 0, 0),
            ],
        }
    }
}
