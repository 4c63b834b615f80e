//! FED device description
//!
//! The subset of FED settings the decoder needs to judge an event: which
//! FE units are enabled and which APVs are masked off. Loaded from the
//! `[description]` table of the TOML configuration.
//!
//! ```toml
//! [description]
//! fed_id = 50
//!
//! [[description.fe_units]]
//! enabled = true
//! disabled_apvs = [0, 1]   # APV index within the FE unit, 0..24
//! ```

use serde::{Deserialize, Serialize};

use crate::decoder::types::geometry::{APVS_PER_CHANNEL, APVS_PER_FEUNIT, FEUNITS_PER_FED};

/// Settings of one FE unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeUnitDescription {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// APVs masked off, numbered 0..24 within the FE unit
    #[serde(default)]
    pub disabled_apvs: Vec<u8>,
}

fn default_enabled() -> bool {
    true
}

impl Default for FeUnitDescription {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_apvs: Vec::new(),
        }
    }
}

/// Description of one FED
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FedDescription {
    #[serde(default)]
    pub fed_id: u16,

    /// Up to 8 entries; missing FE units are enabled with every APV active
    #[serde(default)]
    pub fe_units: Vec<FeUnitDescription>,
}

impl FedDescription {
    /// All FE units and APVs enabled
    pub fn all_enabled() -> Self {
        Self {
            fed_id: 0,
            fe_units: vec![FeUnitDescription::default(); FEUNITS_PER_FED],
        }
    }

    fn fe_unit(&self, fe_unit: usize) -> Option<&FeUnitDescription> {
        self.fe_units.get(fe_unit)
    }

    pub fn is_fe_unit_enabled(&self, fe_unit: usize) -> bool {
        fe_unit < FEUNITS_PER_FED && self.fe_unit(fe_unit).map_or(true, |fe| fe.enabled)
    }

    pub fn is_apv_disabled(&self, fe_unit: usize, apv: usize) -> bool {
        self.fe_unit(fe_unit)
            .is_some_and(|fe| fe.disabled_apvs.iter().any(|&a| a as usize == apv))
    }

    /// A channel counts as enabled unless both of its APVs are disabled
    pub fn is_channel_enabled(&self, fe_unit: usize, channel: usize) -> bool {
        if !self.is_fe_unit_enabled(fe_unit) {
            return false;
        }
        let first = channel * APVS_PER_CHANNEL;
        if first >= APVS_PER_FEUNIT {
            return false;
        }
        !(0..APVS_PER_CHANNEL).all(|k| self.is_apv_disabled(fe_unit, first + k))
    }

    /// Disable one APV, creating FE unit entries as needed
    pub fn disable_apv(&mut self, fe_unit: usize, apv: u8) {
        if self.fe_units.len() <= fe_unit {
            self.fe_units
                .resize(fe_unit + 1, FeUnitDescription::default());
        }
        let apvs = &mut self.fe_units[fe_unit].disabled_apvs;
        if !apvs.contains(&apv) {
            apvs.push(apv);
        }
    }
}
