// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Clock tree derivation.
//!
//! Turns a requested host sample rate and oversampling ratio into the CGEN
//! PLL frequency, the decimation/interpolation chain setting and the FPGA
//! interface clock. The CGEN feeds four converters (AI, AQ, BI, BQ), hence
//! the factor of four; the half-band chains halve the rate per stage, so a
//! chain setting of `n` means a ratio of `2^(n+1)`.

use crate::config::CGEN_MAX_HZ;
use crate::error::{Error, Result};

/// Chain setting that bypasses decimation/interpolation entirely.
pub const CHAIN_BYPASS: u8 = 7;

/// Decimation chain setting per oversampling ratio 0..=16.
const DECIMATION_TABLE: [u8; 17] = [0, 0, 0, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3, 3];

/// Derived clock settings for one sample rate request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockPlan {
    /// Host-visible sample rate the plan was derived for.
    pub sample_rate_hz: f64,
    /// CGEN PLL frequency.
    pub cgen_hz: f64,
    /// Half-band decimation setting ([`CHAIN_BYPASS`] = off).
    pub decimation: u8,
    /// Half-band interpolation setting ([`CHAIN_BYPASS`] = off).
    pub interpolation: u8,
    /// Concrete oversampling ratio after auto-selection.
    pub oversample: u8,
}

/// Derive CGEN and chain settings from `{sample_rate_hz, oversample}`.
///
/// `oversample == 0` requests the largest power of two (up to 32) the CGEN
/// ceiling can afford. `oversample == 1` bypasses the chains, as does an
/// automatic request above 62 MHz where no headroom is left.
pub fn derive(sample_rate_hz: f64, oversample: u8) -> Result<ClockPlan> {
    if sample_rate_hz <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "sample rate {} Hz",
            sample_rate_hz
        )));
    }

    let bypass = oversample == 1 || (oversample == 0 && sample_rate_hz > 62e6);
    let adc_rate = sample_rate_hz * 4.0;

    if bypass {
        log::info!(
            "[CLK] sample rate {:.3} MHz: CGEN {:.3} MHz, chains bypassed",
            sample_rate_hz / 1e6,
            adc_rate / 1e6
        );
        return Ok(ClockPlan {
            sample_rate_hz,
            cgen_hz: adc_rate,
            decimation: CHAIN_BYPASS,
            interpolation: CHAIN_BYPASS,
            oversample: 1,
        });
    }

    let oversample = if oversample == 0 {
        let n = (CGEN_MAX_HZ / adc_rate) as u32;
        match n {
            32.. => 32,
            16..=31 => 16,
            8..=15 => 8,
            4..=7 => 4,
            _ => 2,
        }
    } else {
        oversample
    };

    let decimation = if usize::from(oversample) < DECIMATION_TABLE.len() {
        DECIMATION_TABLE[usize::from(oversample)]
    } else {
        4
    };
    let cgen_hz = adc_rate * f64::from(2u32 << decimation);
    if cgen_hz > CGEN_MAX_HZ {
        return Err(Error::InvalidConfiguration(vec![format!(
            "sample rate {:.3} MHz with oversample {} needs CGEN {:.3} MHz (limit {:.0} MHz)",
            sample_rate_hz / 1e6,
            oversample,
            cgen_hz / 1e6,
            CGEN_MAX_HZ / 1e6
        )]));
    }

    log::info!(
        "[CLK] sample rate {:.3} MHz: CGEN {:.3} MHz, decim 2^{}, interp 2^{}",
        sample_rate_hz / 1e6,
        cgen_hz / 1e6,
        decimation + 1,
        decimation + 1
    );
    Ok(ClockPlan {
        sample_rate_hz,
        cgen_hz,
        decimation,
        interpolation: decimation,
        oversample,
    })
}
