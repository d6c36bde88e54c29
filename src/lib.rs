// Library root
// -----------
// Client for the Luma AI capture API plus the pieces the `luma` binary is
// built from.
//
// Module responsibilities:
// - `api`: authenticated HTTP calls (submit, status, search, credits) and
//   API key resolution.
// - `models`: typed records parsed from the API's JSON responses.
// - `credentials`: the saved API key in the user's config directory.
// - `archive`: detecting submission inputs and zipping image folders.
// - `error`: the error taxonomy shared by all of the above.
// - `ui` / `logging`: the command line shell and its log setup.
//
// Library usage:
//
//     use luma_cli::{ClientConfig, LumaClient, Submission};
//
//     let mut client = LumaClient::new(ClientConfig::default())?.with_api_key(key);
//     let slug = client.submit("scene.mp4", &Submission::new("My scene"))?;
//     println!("{:?}", client.status(&slug)?.status);
pub mod api;
pub mod archive;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod models;
pub mod ui;

pub use api::{
    CaptureSearch, ClientConfig, CredentialResolver, LumaClient, NoPrompt, SearchQuery, SortOrder,
    Submission,
};
pub use credentials::{CredentialRecord, CredentialStore};
pub use error::{LumaError, Result};
pub use models::{
    CameraType, CaptureInfo, CaptureLocation, CaptureStatus, CaptureType, CreditInfo,
    PrivacyLevel, RunInfo, RunStatus,
};
