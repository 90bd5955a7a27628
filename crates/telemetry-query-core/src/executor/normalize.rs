//! Response normalization
//!
//! Unwraps the backend envelope, decodes the payload into the shape the
//! endpoint promises, and checks run-query payloads against the view that
//! was requested. A mismatch is an error; nothing is salvaged from a payload
//! that fails to decode.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ApiEnvelope, CalculationSeries, QueryRunResult, View};

use super::backend::Endpoint;

/// Decode an envelope, returning `None` when it carries no result
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    payload: Value,
    endpoint: Endpoint,
    query: &Value,
) -> Result<Option<T>> {
    let envelope: ApiEnvelope<Value> = serde_json::from_value(payload)
        .map_err(|e| Error::malformed(format!("{endpoint} response envelope: {e}")))?;

    if envelope.success == Some(false) {
        return Err(Error::transmission(
            format!("{endpoint} rejected: {}", envelope.error_summary()),
            None,
            query,
        ));
    }

    match envelope.result {
        None | Some(Value::Null) => Ok(None),
        Some(result) => serde_json::from_value(result)
            .map(Some)
            .map_err(|e| Error::malformed(format!("{endpoint} result: {e}"))),
    }
}

/// Reject run-query payloads carrying another view's data
///
/// Only the `calculations`, `events`, and `invocations` views have a
/// dedicated result field; other views are returned as decoded. Empty
/// foreign fields (`[]`, `{}`, zero events) carry no data and are allowed.
pub fn conform_to_view(result: QueryRunResult, view: View) -> Result<QueryRunResult> {
    let has_series =
        |series: &Option<Vec<CalculationSeries>>| series.as_ref().is_some_and(|s| !s.is_empty());
    let populated = [
        (
            View::Calculations,
            has_series(&result.calculations) || has_series(&result.compare),
        ),
        (
            View::Events,
            result.events.as_ref().is_some_and(|e| {
                e.events.as_ref().is_some_and(|list| !list.is_empty())
                    || e.count.is_some_and(|count| count > 0.0)
            }),
        ),
        (
            View::Invocations,
            result.invocations.as_ref().is_some_and(|m| !m.is_empty()),
        ),
    ];

    if !populated.iter().any(|(owner, _)| *owner == view) {
        return Ok(result);
    }

    if let Some((foreign, _)) = populated
        .iter()
        .find(|(owner, is_set)| *is_set && *owner != view)
    {
        return Err(Error::malformed(format!(
            "`{view}` query answered with `{foreign}` data"
        )));
    }

    Ok(result)
}
