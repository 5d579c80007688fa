//! Scan, validate and re-emit AFS volume dumps.
//!
//! This crate re-exports the stream layer ([`xfile`]) and the dump format
//! layer ([`format`]), and adds [`scan_dump`] and [`copy_dump`] for the
//! common case of processing a whole dump.

pub use dumpscan_format as format;
pub use dumpscan_xfile as xfile;

pub use dumpscan_format::{
    DumpError, DumpHandler, DumpParser, DumpPrinter, OutputFormat, ParserConfig, PathIndex,
    PrintFlags, RepairFlags,
};
pub use dumpscan_xfile::{OpenMode, XFile, XFileError};

use anyhow::{format_err, Error};

/// Counters of a completed scan
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub vnodes: u64,
    /// Problems which were reported and repaired or ignored.
    pub recovered_errors: u64,
}

/// Parse the dump at `name` (a path or `TYPE:name`, see [`xfile::open`])
/// and pass every record to `handler`.
pub fn scan_dump(
    name: &str,
    config: &ParserConfig,
    handler: &mut dyn DumpHandler,
) -> Result<ScanSummary, Error> {
    let mut input = xfile::open(OpenMode::ReadOnly, name)
        .map_err(|err| format_err!("unable to open dump {:?} - {}", name, err))?;

    let mut parser = DumpParser::new(handler, config);
    let result = parser.parse_dump(&mut input);
    let summary = ScanSummary {
        vnodes: parser.vnode_count(),
        recovered_errors: parser.recovered_errors(),
    };
    input.close()?;

    result.map_err(|err| format_err!("error reading dump {:?} - {}", name, err))?;
    log::info!(
        "{}: {} vnodes, {} recovered errors",
        name,
        summary.vnodes,
        summary.recovered_errors
    );
    Ok(summary)
}

struct NullHandler;

impl DumpHandler for NullHandler {}

/// Copy a dump from `input` to `output` while validating it.
///
/// Every byte read by the parser, including skipped vnode data, is passed
/// through to `output`. On success `output` is handed back.
///
/// Repairs which seek back in `input` are disabled for the copy, so
/// damaged dumps can only be passed with skipping of unknown tags.
pub fn copy_dump(input: &mut XFile, output: XFile, config: &ParserConfig) -> Result<XFile, Error> {
    input.set_passthru(output)?;
    let result = DumpParser::new(&mut NullHandler, config).parse_dump(input);
    let output = input.unset_passthru()?;
    result?;
    Ok(output)
}
