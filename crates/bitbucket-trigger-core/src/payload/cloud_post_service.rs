//! Bitbucket Cloud legacy POST service payloads.
//!
//! ```json
//! { "canon_url": "https://bitbucket.org",
//!   "user": "marcus",
//!   "repository": { "absolute_url": "/marcus/project-x/", "scm": "git", ... },
//!   "commits": [ ... ] }
//! ```

use super::{field, required_str, ExtractedFields, Extraction, PayloadError};
use serde_json::Value;
use tracing::info;

pub(crate) fn extract(payload: &Value) -> Result<Extraction, PayloadError> {
    let repository = field(payload, "repository").ok_or_else(|| PayloadError::MissingField {
        field: "repository".to_string(),
    })?;
    info!(
        repository = %repository,
        "Received Bitbucket POST service notification"
    );

    let actor = required_str(payload, "user")?;
    let canon_url = required_str(payload, "canon_url")?;
    let absolute_url =
        required_str(repository, "absolute_url").map_err(|e| e.within("repository"))?;
    // No default here: the POST service always names its SCM.
    let scm_type = required_str(repository, "scm").map_err(|e| e.within("repository"))?;

    Ok(Extraction::Fields(ExtractedFields {
        actor: actor.to_string(),
        repository_url: format!("{canon_url}{absolute_url}"),
        scm_type: scm_type.to_string(),
    }))
}

#[cfg(test)]
#[path = "cloud_post_service_tests.rs"]
mod tests;
