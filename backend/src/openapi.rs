//! OpenAPI documentation configuration.

use crate::discovery::DeviceResponse;
use rpitube_types::{
    CastRequest, CastResponse, ErrorResponse, PlaybackState, StatusResponse, VlcInterfaceResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::cast::cast,
        crate::api::cast::stop,
        crate::api::cast::status,
        crate::api::cast::vlc_interface,
        crate::api::sse::logs_stream,
        crate::api::devices::list_devices,
    ),
    components(
        schemas(
            CastRequest,
            CastResponse,
            StatusResponse,
            PlaybackState,
            VlcInterfaceResponse,
            ErrorResponse,
            DeviceResponse,
        )
    ),
    tags(
        (name = "cast", description = "Download and cast videos"),
        (name = "discovery", description = "Cast receiver discovery")
    ),
    info(
        title = "RPiTube API",
        version = "0.3.0",
        description = "Cast web videos to a Chromecast through yt-dlp and VLC",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;
