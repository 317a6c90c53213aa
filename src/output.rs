//! Render a [`SimulationResult`] for external analysis tooling.

use std::io;

use serde_json::json;

use crate::sim::records::RecordValue;
use crate::sim::SimulationResult;
use crate::utils::prelude::*;

/// Long-format CSV: one row per sample.
pub fn render_csv<W: io::Write>(result: &SimulationResult, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(&["record", "timestamp", "value"])?;
    for (record, series) in result.records() {
        for entry in series {
            csv.write_record(&[
                record.to_string(),
                entry.at.to_string(),
                entry.value.to_string(),
            ])?;
        }
    }
    csv.flush()?;
    Ok(())
}

/// The whole result as one JSON document.
pub fn render_json<W: io::Write>(result: &SimulationResult, writer: W) -> Result<()> {
    let records = result
        .records()
        .map(|(record, series)| {
            let samples = series
                .iter()
                .map(|entry| json!([entry.at.0, value_json(&entry.value)]))
                .collect::<Vec<_>>();
            json!({
                "record": record.to_string(),
                "samples": samples,
            })
        })
        .collect::<Vec<_>>();

    let doc = json!({
        "duration": result.duration().0,
        "records": records,
    });
    serde_json::to_writer_pretty(writer, &doc)?;
    Ok(())
}

fn value_json(value: &RecordValue) -> serde_json::Value {
    match value {
        RecordValue::Count(c) => json!(c),
        RecordValue::Gauge(g) => json!(g),
        RecordValue::Stamp(t) => json!(t.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::records::Record;
    use crate::sim::Scheduler;

    fn sample_result() -> SimulationResult {
        let mut sched = Scheduler::new();
        sched.record_add(Record::RunningMachines, 2);
        sched.gauge_add(Record::DataTransfer, 1.5);
        sched.into_result()
    }

    #[test]
    fn csv_has_one_row_per_sample() {
        let result = sample_result();
        let mut buf = Vec::new();
        render_csv(&result, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "record,timestamp,value");
        assert!(lines.contains(&"running_machines,0,2"));
        assert!(lines.contains(&"data_transfer,0,1.5"));
    }

    #[test]
    fn json_document_shape() {
        let result = sample_result();
        let mut buf = Vec::new();
        render_json(&result, &mut buf).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(doc["duration"], 0);
        let records = doc["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r["record"] == "running_machines"));
    }
}
