//! `weave status` and `weave version`.

use weave_common::{WeaveError, WeaveResult};

use crate::runtime::{ContainerRuntime, ImageInfo};

/// Fetch the router's status report.
///
/// # Errors
///
/// Returns [`WeaveError::Status`] if the router cannot be reached or
/// answers with an error status.
pub async fn fetch_status(url: &str) -> WeaveResult<String> {
    tracing::debug!(url, "Fetching router status");
    let status_error = |e: reqwest::Error| WeaveError::Status {
        message: e.to_string(),
    };

    reqwest::get(url)
        .await
        .map_err(status_error)?
        .error_for_status()
        .map_err(status_error)?
        .text()
        .await
        .map_err(status_error)
}

/// Look up the router image.
///
/// # Errors
///
/// Returns an error if the image is not present locally.
pub async fn router_image(runtime: &dyn ContainerRuntime, image: &str) -> WeaveResult<ImageInfo> {
    runtime
        .image(image)
        .await?
        .ok_or_else(|| WeaveError::RuntimeCommand {
            message: format!("Unable to find image {image}"),
        })
}
