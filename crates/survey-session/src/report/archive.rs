use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ReportError;

/// Complete submission as stored next to its report, CBOR encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub survey_name: String,
    pub survey_version: String,
    pub engine_version: String,
    pub reference_code: String,
    pub timestamp_unix: i64,
    pub answers: Map<String, Value>,
    pub table: Vec<Vec<String>>,
    pub results: BTreeMap<String, String>,
    #[serde(default)]
    pub client_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_url: Option<String>,
}

impl ArchiveRecord {
    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let io_error = |source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        serde_cbor::to_writer(&mut writer, self)?;
        writer.flush().map_err(io_error)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let file = File::open(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_cbor::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn archive_record_survives_a_disk_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("1700000000_AB2-3CD.cbor");
        let record = ArchiveRecord {
            survey_name: "screen".into(),
            survey_version: "1".into(),
            engine_version: "0.3.0".into(),
            reference_code: "AB2-3CD".into(),
            timestamp_unix: 1_700_000_000,
            answers: json!({ "age": 40, "smoker": null })
                .as_object()
                .cloned()
                .expect("object"),
            table: vec![vec!["Model".into(), "Risk".into()], vec!["a".into(), "1".into()]],
            results: BTreeMap::from([("a_Risk".to_string(), "1".to_string())]),
            client_hashes: BTreeMap::new(),
            survey_url: None,
        };

        record.write(&path).expect("write");
        assert_eq!(ArchiveRecord::read(&path).expect("read"), record);
    }
}
