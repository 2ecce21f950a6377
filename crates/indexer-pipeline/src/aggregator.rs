//! Fan-in of per-slice results for one file.

use indexer_types::ExtractResult;

/// Concatenate the slice results of one file into a single add/delete pair.
///
/// Absent results (dropped slices) contribute nothing.
pub fn aggregate<I>(results: I) -> ExtractResult
where
    I: IntoIterator<Item = Option<ExtractResult>>,
{
    results
        .into_iter()
        .flatten()
        .fold(ExtractResult::new(), |mut combined, result| {
            combined.adds.extend(result.adds);
            combined.deletes.extend(result.deletes);
            combined
        })
}
