//! Bitbucket Server post-webhook payloads.
//!
//! The repository URL is not part of the payload. It is rebuilt from the
//! scheme and host of the newest changeset's self link plus the project key
//! and repository slug, using the `/scm/` path Bitbucket Server serves clone
//! URLs under:
//!
//! ```text
//! {scheme}://{host}/scm/{project.key}/{slug}
//! ```
//!
//! The self link itself comes in two encodings. The documented payload has a
//! single object, `"links": { "self": { "href": "..." } }`, while Bitbucket
//! Server 4.4 with the post-webhook plugin 3.x sends an array,
//! `"links": { "self": [ { "href": "..." } ] }`. [`SelfLinks`] accepts both.

use super::{field, required_str, ExtractedFields, Extraction, PayloadError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, trace};
use url::Url;

/// Path of the newest changeset in error messages.
const LAST_CHANGESET: &str = "changesets.values[last]";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct Link {
    href: String,
}

/// The two encodings of a changeset's `links.self`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum SelfLinks {
    Single(Link),
    Many(Vec<Link>),
}

impl SelfLinks {
    /// The href to use; the first one when several are listed.
    fn into_href(self) -> Option<String> {
        match self {
            Self::Single(link) => Some(link.href),
            Self::Many(links) => links.into_iter().next().map(|link| link.href),
        }
    }
}

pub(crate) fn extract(payload: &Value) -> Result<Extraction, PayloadError> {
    let repository = field(payload, "repository").ok_or_else(|| PayloadError::MissingField {
        field: "repository".to_string(),
    })?;
    info!(
        repository = %repository,
        "Received Bitbucket Server post-webhook notification"
    );
    trace!(payload = %payload, "Bitbucket Server post-webhook payload");

    let changeset = last_changeset(payload)?;
    let actor =
        required_str(changeset, "toCommit.author.name").map_err(|e| e.within(LAST_CHANGESET))?;
    let href = self_href(changeset)?;

    let href_url = Url::parse(&href).map_err(|source| {
        error!(href = %href, error = %source, "Could not parse repository URI");
        PayloadError::MalformedUrl {
            href: href.clone(),
            source,
        }
    })?;
    let host = href_url.host_str().ok_or_else(|| {
        error!(href = %href, "Repository URI has no host");
        PayloadError::MalformedUrl {
            href: href.clone(),
            source: url::ParseError::EmptyHost,
        }
    })?;

    let project_key = required_str(repository, "project.key").map_err(|e| e.within("repository"))?;
    let slug = required_str(repository, "slug").map_err(|e| e.within("repository"))?;
    let scm_type = required_str(repository, "scmId").map_err(|e| e.within("repository"))?;

    Ok(Extraction::Fields(ExtractedFields {
        actor: actor.to_string(),
        repository_url: format!(
            "{}://{}/scm/{}/{}",
            href_url.scheme(),
            host,
            project_key,
            slug
        ),
        scm_type: scm_type.to_string(),
    }))
}

/// The newest changeset: the server lists them oldest first.
fn last_changeset(payload: &Value) -> Result<&Value, PayloadError> {
    let values = field(payload, "changesets.values").ok_or_else(|| PayloadError::MissingField {
        field: "changesets.values".to_string(),
    })?;

    values
        .as_array()
        .ok_or_else(|| PayloadError::InvalidFieldType {
            field: "changesets.values".to_string(),
        })?
        .last()
        .ok_or_else(|| PayloadError::MissingField {
            field: LAST_CHANGESET.to_string(),
        })
}

fn self_href(changeset: &Value) -> Result<String, PayloadError> {
    let path = format!("{LAST_CHANGESET}.links.self");
    let links = field(changeset, "links.self").ok_or_else(|| PayloadError::MissingField {
        field: path.clone(),
    })?;

    SelfLinks::deserialize(links)
        .map_err(|_| PayloadError::InvalidFieldType {
            field: path.clone(),
        })?
        .into_href()
        .ok_or(PayloadError::MissingField {
            field: format!("{path}[0].href"),
        })
}

#[cfg(test)]
#[path = "server_webhook_tests.rs"]
mod tests;
