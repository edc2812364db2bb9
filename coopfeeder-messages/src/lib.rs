#![cfg_attr(not(test), no_std)]
// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! Records the feeder node hands to remote readers. Field names on the wire follow the serde
//! renames here, so the console and any network transport print the same JSON.

pub mod readings;
pub mod status;

pub use readings::{ReadingsRecord, Units};
pub use status::StatusReport;

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn readings_serialize_with_web_field_names() {
        let json = serde_json::to_value(ReadingsRecord::percent(50, 1234)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "loadcell": 50, "units": "%", "lastUpdate": 1234 })
        );
    }

    #[test]
    fn readings_read_back_from_web_json() {
        let record: ReadingsRecord =
            serde_json::from_str(r#"{"loadcell":7,"units":"%","lastUpdate":1700000000000}"#)
                .unwrap();
        assert_eq!(record, ReadingsRecord::percent(7, 1_700_000_000_000));
    }

    #[test]
    fn status_without_conversion_has_null_raw() {
        let json = serde_json::to_value(StatusReport {
            uptime_s: 3600,
            raw: None,
            empty_offset: 1000,
            full_offset: -419_000,
        })
        .unwrap();
        assert_eq!(json["raw"], serde_json::Value::Null);
        assert_eq!(json["full_offset"], -419_000);
    }
}
