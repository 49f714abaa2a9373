//! Report encoding: turns device state into USB writes.
//!
//! Vendor report layouts are not part of this crate; [`PlanarEncoder`] is a
//! generic layout that splits each color plane into fixed-size chunks.
//! Indicator reports use the standard HID boot-keyboard LED byte.

use crate::device::Report;
use crate::lighting::{Lighting, Rgb};
use crate::protocol::{Indicators, LIGHTING_HEADER_SIZE, REPORT_LIGHTING, REPORT_SIZE};

/// Encodes state changes into reports for the outgoing queue.
pub trait ReportEncoder {
    /// Reports for one full lighting frame, in send order.
    fn lighting(&self, lighting: &Lighting) -> Vec<Report>;

    /// Report that sets the keyboard's indicator LEDs.
    fn indicators(&self, indicators: Indicators) -> Report;
}

/// Red, green and blue planes, each chunked as
/// `[REPORT_LIGHTING, plane, chunk, len, data…]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanarEncoder;

const PLANES: [fn(&Rgb) -> u8; 3] = [|c| c.r, |c| c.g, |c| c.b];

impl ReportEncoder for PlanarEncoder {
    fn lighting(&self, lighting: &Lighting) -> Vec<Report> {
        let colors = lighting.effective_colors();
        let mut reports = Vec::new();
        for (plane, channel) in PLANES.iter().enumerate() {
            let bytes: Vec<u8> = colors.iter().map(channel).collect();
            for (chunk_no, chunk) in bytes.chunks(REPORT_SIZE - LIGHTING_HEADER_SIZE).enumerate() {
                let mut report = Vec::with_capacity(LIGHTING_HEADER_SIZE + chunk.len());
                report.push(REPORT_LIGHTING);
                report.push(plane as u8);
                report.push(chunk_no as u8);
                report.push(chunk.len() as u8);
                report.extend_from_slice(chunk);
                reports.push(report);
            }
        }
        reports
    }

    fn indicators(&self, indicators: Indicators) -> Report {
        vec![indicators.bits()]
    }
}
