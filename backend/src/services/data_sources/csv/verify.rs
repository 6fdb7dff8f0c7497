use crate::error::SubmitError;
use crate::job_controller::BatchEngine;
use crate::services::submit_error;
use crate::services::upload;
use crate::source::{delimiter, ParsedSource, RowError};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use common::model::csv::{ColumnCheck, InvalidCell, SourceReport};
use common::model::place_holder::PlaceholderType;
use common::model::record::Record;
use common::requests::SourceSettings;
use log::info;
use rayon::prelude::*;
use std::time::Instant;

/// The Actix web handler for `POST /api/data_sources/csv/verify`.
///
/// Reads an uploaded `records` part the way a submission would and reports
/// the detected encoding and delimiter, the headers, a type per column and
/// the first cell that breaks it.
///
/// # Arguments
/// * `engine` - The shared `BatchEngine`, for the working root and limits.
/// * `payload` - The multipart body with `records` and an optional
///   `sourceOptions` JSON part.
///
/// # Returns
/// `200` with a `SourceReport`, or `400` when the source cannot be read.
pub(crate) async fn process(engine: web::Data<BatchEngine>, payload: Multipart) -> impl Responder {
    match verify_upload(&engine, payload).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(err) => submit_error(&err),
    }
}

async fn verify_upload(engine: &BatchEngine, payload: Multipart) -> Result<SourceReport, SubmitError> {
    let root = &engine.config().working_root;
    tokio::fs::create_dir_all(root).await?;
    let staging = tempfile::Builder::new()
        .prefix(".verify-")
        .tempdir_in(root)?;

    let mut parts = upload::receive(
        payload,
        staging.path(),
        &["records"],
        &["sourceOptions"],
        engine.config().max_source_bytes,
    )
    .await?;
    let settings: SourceSettings = parts.json("sourceOptions")?.unwrap_or_default();
    let file = parts.take_file("records")?;
    let options = upload::source_options(engine.source_options(), &settings)?;
    let parsed = upload::parse_source(&file, options).await?;

    tokio::task::spawn_blocking(move || verify(parsed))
        .await
        .map_err(|e| SubmitError::Io(std::io::Error::other(e.to_string())))
}

/// Type every column from the first record, then scan all rows for the
/// first cell that does not fit.
pub(crate) fn verify(parsed: ParsedSource) -> SourceReport {
    let start = Instant::now();
    let ParsedSource {
        headers,
        records,
        metadata,
    } = parsed;
    let rows: Vec<Result<Record, RowError>> = records.collect();
    let first = rows.iter().find_map(|r| r.as_ref().ok());
    let columns = infer_column_checks(&headers, first);
    let first_invalid = find_first_invalid(&rows, &columns);
    info!(
        "Verified data source {}: {} rows in {:.2?}",
        metadata.md5,
        rows.len(),
        start.elapsed()
    );

    SourceReport {
        encoding: metadata.encoding.label().to_string(),
        delimiter: delimiter::display(metadata.delimiter),
        headers,
        rows: rows.len(),
        md5: metadata.md5,
        columns,
        first_invalid,
    }
}

fn infer_column_checks(headers: &[String], first: Option<&Record>) -> Vec<ColumnCheck> {
    headers
        .iter()
        .map(|title| {
            let sample = first.and_then(|r| r.get(title)).filter(|v| !v.is_null());
            ColumnCheck {
                title: title.clone(),
                placeholder_type: sample
                    .map(|v| PlaceholderType::infer(&v.to_string()))
                    .unwrap_or(PlaceholderType::Text),
                first_row: sample.map(|v| v.to_string()),
            }
        })
        .collect()
}

fn find_first_invalid(
    rows: &[Result<Record, RowError>],
    columns: &[ColumnCheck],
) -> Option<InvalidCell> {
    rows.par_iter().find_map_first(|row| match row {
        Err(e) => Some(InvalidCell {
            row_index: e.row_index,
            column: String::new(),
            value: e.message.clone(),
        }),
        Ok(record) => columns.iter().find_map(|col| {
            let value = record
                .get(&col.title)
                .map(|v| v.to_string())
                .unwrap_or_default();
            (!col.placeholder_type.accepts(&value)).then(|| InvalidCell {
                row_index: record.row_index,
                column: col.title.clone(),
                value,
            })
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{self, SourceOptions};

    fn report(csv: &str) -> SourceReport {
        verify(source::parse(csv.as_bytes(), &SourceOptions::default()).unwrap())
    }

    #[test]
    fn infers_types_from_first_record() {
        let r = report("name;amount;mail\nAna;12.5;ana@x.io\nBo;3;bo@x.io\n");
        assert_eq!(r.delimiter, ";");
        assert_eq!(r.rows, 2);
        let types: Vec<_> = r.columns.iter().map(|c| c.placeholder_type).collect();
        assert_eq!(
            types,
            vec![
                PlaceholderType::Text,
                PlaceholderType::Number,
                PlaceholderType::Email
            ]
        );
        assert_eq!(r.columns[1].first_row.as_deref(), Some("12.5"));
        assert!(r.first_invalid.is_none());
    }

    #[test]
    fn reports_first_invalid_cell_in_row_order() {
        let r = report("name,amount\nAna,1\nBo,two\nCy,three\n");
        let invalid = r.first_invalid.unwrap();
        assert_eq!(invalid.row_index, 2);
        assert_eq!(invalid.column, "amount");
        assert_eq!(invalid.value, "two");
    }
}
