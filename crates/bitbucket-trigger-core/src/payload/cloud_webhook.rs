//! Bitbucket Cloud webhook payloads (`repo:push` event).
//!
//! Two body shapes arrive under the Cloud webhook headers:
//!
//! ```json
//! { "actor": { "username": "..." },
//!   "repository": { "scm": "git", "links": { "html": { "href": "..." } } },
//!   "push": { ... } }
//! ```
//!
//! and an older Mercurial variant without the `repository` wrapper:
//!
//! ```json
//! { "scm": "hg", "owner": { "username": "..." },
//!   "links": { "html": { "href": "..." } } }
//! ```

use super::{field, required_str, str_or, ExtractedFields, Extraction, PayloadError};
use serde_json::Value;
use tracing::{info, trace};

pub(crate) fn extract(payload: &Value) -> Result<Extraction, PayloadError> {
    if let Some(repository) = field(payload, "repository") {
        info!(
            repository = %repository,
            "Received Bitbucket Cloud webhook notification"
        );

        let actor = required_str(payload, "actor.username")?;
        let repository_url =
            required_str(repository, "links.html.href").map_err(|e| e.within("repository"))?;
        let scm_type = str_or(repository, "scm", "git").map_err(|e| e.within("repository"))?;

        return Ok(Extraction::Fields(ExtractedFields {
            actor: actor.to_string(),
            repository_url: repository_url.to_string(),
            scm_type: scm_type.to_string(),
        }));
    }

    if field(payload, "scm").is_some() {
        info!("Received Bitbucket Cloud webhook notification for hg");
        trace!(payload = %payload, "Mercurial webhook payload");

        let actor = required_str(payload, "owner.username")?;
        let repository_url = required_str(payload, "links.html.href")?;
        let scm_type = str_or(payload, "scm", "hg")?;

        return Ok(Extraction::Fields(ExtractedFields {
            actor: actor.to_string(),
            repository_url: repository_url.to_string(),
            scm_type: scm_type.to_string(),
        }));
    }

    Ok(Extraction::Unrecognized {
        reason: "webhook payload has neither 'repository' nor 'scm'",
    })
}

#[cfg(test)]
#[path = "cloud_webhook_tests.rs"]
mod tests;
