//! `--csv-dir` export: one CSV per result section plus the break summary.
//!
//! Compared rows carry four columns per metric: `d1g1t_<m>`, `custodian_<m>`,
//! `<m>_diff` (d1g1t minus custodian) and `<m>_reconciled`. Unmatched rows
//! carry their own side's prefixed metrics.

use std::path::{Path, PathBuf};

use custodia_recon::model::{ComparedRow, PositionRow, Side};
use custodia_recon::ReconResult;

pub const MATCHED_FILE: &str = "matched.csv";
pub const MISMATCHED_FILE: &str = "mismatched.csv";
pub const UNMATCHED_D1G1T_FILE: &str = "unmatched_d1g1t.csv";
pub const UNMATCHED_CUSTODIAN_FILE: &str = "unmatched_custodian.csv";
pub const SUMMARY_FILE: &str = "summary.csv";

/// Write every section of `result` into `dir`, creating it if needed.
/// Returns the written paths in a fixed order.
pub fn write_csv_dir(result: &ReconResult, dir: &Path) -> Result<Vec<PathBuf>, csv::Error> {
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(5);

    let path = dir.join(MATCHED_FILE);
    write_compared(&path, &result.matched)?;
    written.push(path);

    let path = dir.join(MISMATCHED_FILE);
    write_compared(&path, &result.mismatched)?;
    written.push(path);

    let path = dir.join(UNMATCHED_D1G1T_FILE);
    write_unmatched(&path, Side::D1g1t, &result.unmatched_d1g1t)?;
    written.push(path);

    let path = dir.join(UNMATCHED_CUSTODIAN_FILE);
    write_unmatched(&path, Side::Custodian, &result.unmatched_custodian)?;
    written.push(path);

    let path = dir.join(SUMMARY_FILE);
    write_summary(&path, result)?;
    written.push(path);

    Ok(written)
}

/// Metric names in first-seen order.
fn compared_metrics(rows: &[ComparedRow]) -> Vec<&str> {
    let mut metrics: Vec<&str> = Vec::new();
    for c in rows.iter().flat_map(|r| &r.comparisons) {
        if !metrics.contains(&c.metric.as_str()) {
            metrics.push(&c.metric);
        }
    }
    metrics
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_compared(path: &Path, rows: &[ComparedRow]) -> Result<(), csv::Error> {
    let metrics = compared_metrics(rows);
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = [
        "client_id",
        "instrument_id",
        "as_of_date",
        "custodian_id",
        "instrument_type",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for m in &metrics {
        header.push(format!("d1g1t_{m}"));
        header.push(format!("custodian_{m}"));
        header.push(format!("{m}_diff"));
        header.push(format!("{m}_reconciled"));
    }
    header.push("note".into());
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.key.client_id.clone(),
            row.key.instrument_id.clone(),
            row.key.as_of_date.to_string(),
            row.custodian_id.clone(),
            row.instrument_type.to_string(),
        ];
        for m in &metrics {
            match row.comparison(m) {
                Some(c) => {
                    record.push(cell(c.d1g1t_value));
                    record.push(cell(c.custodian_value));
                    record.push(cell(c.difference));
                    record.push((!c.is_break()).to_string());
                }
                None => record.extend(std::iter::repeat(String::new()).take(4)),
            }
        }
        record.push(row.note.clone().unwrap_or_default());
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_unmatched(path: &Path, side: Side, rows: &[PositionRow]) -> Result<(), csv::Error> {
    let mut metrics: Vec<&str> = Vec::new();
    for name in rows.iter().flat_map(|r| r.metrics.keys()) {
        if !metrics.contains(&name.as_str()) {
            metrics.push(name);
        }
    }

    let mut wtr = csv::Writer::from_path(path)?;
    let mut header: Vec<String> = [
        "client_id",
        "firm_id",
        "custodian_id",
        "instrument_id",
        "instrument_type",
        "as_of_date",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(metrics.iter().map(|m| format!("{}_{m}", side.prefix())));
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.client_id.clone(),
            row.firm_id.clone(),
            row.custodian_id.clone(),
            row.instrument_id.clone(),
            row.instrument_type.to_string(),
            row.as_of_date.to_string(),
        ];
        record.extend(metrics.iter().map(|m| cell(row.metric(m))));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_summary(path: &Path, result: &ReconResult) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["custodian_id", "metric", "breaks", "total", "reconciled_pct"])?;
    for b in &result.summary.breaks {
        wtr.write_record([
            b.custodian_id.clone(),
            b.metric.clone(),
            b.breaks.to_string(),
            b.total.to_string(),
            b.reconciled_pct.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use custodia_recon::config::ToleranceKind;
    use custodia_recon::model::{
        BreakSummary, InstrumentType, MetricDelta, PositionKey, ReconMeta, ReconSummary,
    };
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 28).unwrap()
    }

    fn units(d1g1t: i64, custodian: i64, tolerance: i64) -> MetricDelta {
        let (d, c) = (Decimal::from(d1g1t), Decimal::from(custodian));
        MetricDelta {
            metric: "units".into(),
            d1g1t_value: Some(d),
            custodian_value: Some(c),
            delta: Some((d - c).abs()),
            difference: Some(d - c),
            tolerance: Decimal::from(tolerance),
            tolerance_kind: ToleranceKind::Absolute,
            within_tolerance: (d - c).abs() <= Decimal::from(tolerance),
            waived: false,
        }
    }

    fn compared(instrument: &str, delta: MetricDelta, note: Option<&str>) -> ComparedRow {
        ComparedRow {
            key: PositionKey {
                client_id: "C100".into(),
                instrument_id: instrument.into(),
                as_of_date: date(),
            },
            custodian_id: "nbin".into(),
            instrument_type: InstrumentType::Equity,
            comparisons: vec![delta],
            note: note.map(str::to_string),
        }
    }

    fn sample() -> ReconResult {
        let mut metrics = BTreeMap::new();
        metrics.insert("units".to_string(), Some(Decimal::from(7)));
        ReconResult {
            meta: ReconMeta {
                firm_id: "pcr".into(),
                client_id: "C100".into(),
                as_of_date: date(),
                custodians: vec!["nbin".into()],
                adapter: "identity".into(),
                engine_version: "test".into(),
            },
            summary: ReconSummary {
                matched: 1,
                mismatched: 1,
                unmatched_d1g1t: 0,
                unmatched_custodian: 1,
                suppressed: 0,
                dead_positions: 0,
                breaks: vec![BreakSummary {
                    custodian_id: "nbin".into(),
                    metric: "units".into(),
                    breaks: 1,
                    total: 2,
                    reconciled_pct: Decimal::from(50),
                }],
            },
            matched: vec![compared("AAPL", units(100, 100, 0), None)],
            mismatched: vec![compared(
                "MSFT",
                units(50, 48, 1),
                Some("not compared, column missing: price"),
            )],
            unmatched_d1g1t: vec![],
            unmatched_custodian: vec![PositionRow {
                client_id: "C100".into(),
                firm_id: "pcr".into(),
                custodian_id: "nbin".into(),
                instrument_id: "TSLA".into(),
                instrument_type: InstrumentType::Equity,
                as_of_date: date(),
                metrics,
            }],
        }
    }

    #[test]
    fn writes_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let written = write_csv_dir(&sample(), &out).unwrap();

        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                MATCHED_FILE,
                MISMATCHED_FILE,
                UNMATCHED_D1G1T_FILE,
                UNMATCHED_CUSTODIAN_FILE,
                SUMMARY_FILE
            ]
        );
        assert!(written.iter().all(|p| p.exists()));
    }

    #[test]
    fn mismatched_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_csv_dir(&sample(), dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join(MISMATCHED_FILE)).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "client_id,instrument_id,as_of_date,custodian_id,instrument_type,d1g1t_units,custodian_units,units_diff,units_reconciled,note"
        );
        assert_eq!(
            lines.next().unwrap(),
            "C100,MSFT,2024-03-28,nbin,equity,50,48,2,false,\"not compared, column missing: price\""
        );
    }

    #[test]
    fn unmatched_uses_side_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write_csv_dir(&sample(), dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join(UNMATCHED_CUSTODIAN_FILE)).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.ends_with(",custodian_units"));

        let empty = std::fs::read_to_string(dir.path().join(UNMATCHED_D1G1T_FILE)).unwrap();
        assert_eq!(empty.lines().count(), 1);
    }

    #[test]
    fn summary_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_csv_dir(&sample(), dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert_eq!(
            text,
            "custodian_id,metric,breaks,total,reconciled_pct\nnbin,units,1,2,50\n"
        );
    }
}
