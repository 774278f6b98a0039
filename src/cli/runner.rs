use std::io::Write;

use crate::book::TITLE;
use crate::catalog::Catalog;
use crate::connection::Connection;
use crate::errors::{Result, ShelfError};
use crate::index::catalog_indexes;
use crate::mapper::{DecodeBatch, DecodeFailure};
use crate::query::{FindSpec, Filter, Page, Projection, parse_sort};
use crate::{book::BookChanges, seed};

use super::command::Command;
use super::util::{book_line, document_json, list_filter, metric_text};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OutputMode {
    #[default]
    Pretty,
    Ndjson,
}

impl std::str::FromStr for OutputMode {
    type Err = ShelfError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "human" => Ok(Self::Pretty),
            "ndjson" | "json" | "jsonl" => Ok(Self::Ndjson),
            other => Err(ShelfError::invalid(format!("unknown output format `{other}`"))),
        }
    }
}

fn json_line(out: &mut impl Write, v: &impl serde::Serialize) -> Result<()> {
    let line = serde_json::to_string(v).map_err(std::io::Error::other)?;
    writeln!(out, "{line}")?;
    Ok(())
}

fn report_failures(diag: &mut impl Write, failures: &[DecodeFailure]) -> Result<()> {
    for f in failures {
        writeln!(diag, "warning: skipped {f}")?;
    }
    Ok(())
}

/// Run `cmd` on `conn`. Results go to `out`; warnings about skipped records go to `diag`.
///
/// # Errors
/// Any façade error from the underlying operation, or `Io` when writing fails.
pub async fn run(
    conn: &mut Connection,
    cmd: Command,
    mode: OutputMode,
    out: &mut impl Write,
    diag: &mut impl Write,
) -> Result<()> {
    match cmd {
        Command::List { genre, author, after_year, in_stock, where_json, fields, no_id, sort, limit, offset } => {
            let filter = list_filter(genre.as_deref(), author.as_deref(), after_year, in_stock, where_json.as_deref())?;
            let mut spec = FindSpec::new(filter);
            if let Some(s) = sort {
                spec = spec.sort(parse_sort(&s)?);
            }
            match (limit, offset) {
                (Some(l), o) => spec = spec.page(Page::new(l, o.unwrap_or(0))),
                (None, Some(o)) => spec = spec.page(Page::unbounded_from(o)),
                (None, None) => {}
            }
            let mut catalog = Catalog::new(conn);
            if let Some(fields) = fields {
                let projection = Projection::fields(fields);
                spec = spec.project(if no_id { projection.without_id() } else { projection });
                let docs = catalog.find_documents(&spec).await?;
                for d in &docs {
                    let v = document_json(d);
                    match mode {
                        OutputMode::Pretty => writeln!(out, "{v}")?,
                        OutputMode::Ndjson => json_line(out, &v)?,
                    }
                }
                return Ok(());
            }
            let DecodeBatch { records, failures } = catalog.find(&spec).await?;
            match mode {
                OutputMode::Pretty if records.is_empty() => writeln!(out, "no books found")?,
                OutputMode::Pretty => {
                    for b in &records {
                        writeln!(out, "{}", book_line(b))?;
                    }
                }
                OutputMode::Ndjson => {
                    for b in &records {
                        json_line(out, b)?;
                    }
                }
            }
            report_failures(diag, &failures)
        }
        Command::UpdatePrice { title, price } => {
            let outcome = Catalog::new(conn)
                .update_one(&Filter::all().eq(TITLE, title.as_str()), &BookChanges::price(price))
                .await?;
            match mode {
                OutputMode::Ndjson => json_line(
                    out,
                    &serde_json::json!({ "title": title, "matched": outcome.matched, "modified": outcome.modified }),
                )?,
                OutputMode::Pretty if outcome.matched == 0 => writeln!(out, "no book titled \"{title}\"")?,
                OutputMode::Pretty if outcome.modified == 0 => {
                    writeln!(out, "\"{title}\" already costs {}", metric_text(Some(price)))?;
                }
                OutputMode::Pretty => writeln!(out, "updated \"{title}\": price {price:.2}")?,
            }
            Ok(())
        }
        Command::Delete { title } => {
            let deleted = Catalog::new(conn).delete_one(&Filter::all().eq(TITLE, title.as_str())).await?;
            match mode {
                OutputMode::Ndjson => json_line(out, &serde_json::json!({ "title": title, "deleted": deleted }))?,
                OutputMode::Pretty if deleted == 0 => writeln!(out, "no book titled \"{title}\"")?,
                OutputMode::Pretty => writeln!(out, "deleted \"{title}\"")?,
            }
            Ok(())
        }
        Command::Stats { by } => {
            let batch = Catalog::new(conn).stats(by).await?;
            write_groups(out, mode, &batch)?;
            report_failures(diag, &batch.failures)
        }
        Command::TopAuthors { n } => {
            let batch = Catalog::new(conn).top_authors(n).await?;
            write_groups(out, mode, &batch)?;
            report_failures(diag, &batch.failures)
        }
        Command::CreateIndexes => {
            let results = Catalog::new(conn).ensure_indexes(&catalog_indexes()?).await?;
            for (name, created) in results {
                match mode {
                    OutputMode::Ndjson => json_line(out, &serde_json::json!({ "index": name, "created": created }))?,
                    OutputMode::Pretty if created => writeln!(out, "{name}: created")?,
                    OutputMode::Pretty => writeln!(out, "{name}: already present")?,
                }
            }
            Ok(())
        }
        Command::Explain { title } => {
            let report = Catalog::new(conn).explain(&Filter::all().eq(TITLE, title.as_str())).await?;
            match mode {
                OutputMode::Ndjson => json_line(out, &report)?,
                OutputMode::Pretty => {
                    for (label, s) in [("planned", &report.indexed), ("full scan", &report.full_scan)] {
                        writeln!(
                            out,
                            "{label:<10} index={:<24} keys_examined={} docs_examined={} returned={} time_ms={}",
                            s.index_name.as_deref().unwrap_or(if s.used_index { "?" } else { "none" }),
                            s.keys_examined,
                            s.docs_examined,
                            s.returned,
                            s.time_ms
                        )?;
                    }
                    let verdict = if report.index_effective() { "index used" } else { "no index used" };
                    writeln!(out, "{verdict}")?;
                }
            }
            Ok(())
        }
        Command::Seed { synthetic, seed: rng_seed } => {
            let books = match synthetic {
                Some(n) => seed::synthetic(n, rng_seed),
                None => seed::sample_catalog(),
            };
            let n = Catalog::new(conn).insert_many(&books).await?;
            match mode {
                OutputMode::Ndjson => json_line(out, &serde_json::json!({ "inserted": n }))?,
                OutputMode::Pretty => writeln!(out, "inserted {n} books")?,
            }
            Ok(())
        }
        Command::Info => {
            let info = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "connection": conn.id().to_string(),
                "backend": conn.backend(),
                "collection": conn.collection(),
                "op_timeout_ms": u64::try_from(conn.default_timeout().as_millis()).unwrap_or(u64::MAX),
                "compiled_features": crate::built::COMPILED_FEATURES,
            });
            match mode {
                OutputMode::Ndjson => json_line(out, &info)?,
                OutputMode::Pretty => {
                    let text = serde_json::to_string_pretty(&info).map_err(std::io::Error::other)?;
                    writeln!(out, "{text}")?;
                }
            }
            Ok(())
        }
    }
}

fn write_groups(out: &mut impl Write, mode: OutputMode, batch: &DecodeBatch<crate::mapper::GroupRow>) -> Result<()> {
    for row in &batch.records {
        match mode {
            OutputMode::Ndjson => {
                let mut obj = serde_json::Map::new();
                obj.insert("key".into(), serde_json::Value::String(row.label()));
                for (name, v) in &row.metrics {
                    obj.insert(name.clone(), v.map_or(serde_json::Value::Null, serde_json::Value::from));
                }
                json_line(out, &obj)?;
            }
            OutputMode::Pretty => {
                let metrics: Vec<String> =
                    row.metrics.iter().map(|(n, v)| format!("{n}={}", metric_text(*v))).collect();
                writeln!(out, "{:<28} {}", row.label(), metrics.join(" "))?;
            }
        }
    }
    Ok(())
}

