mod drive;
mod signer;
mod smugmug;
mod status;

pub use drive::{
    DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE, escape_query_value, file_query,
    folder_query,
};
pub use signer::{ApiKeySigner, RequestSigner, StaticAuthorization};
pub use smugmug::{
    Album, AlbumImage, ImageUris, Page, SmugMugClient, SmugMugError, UriRef, User, UserUris,
};
pub use status::{ApiErrorClass, classify_api_status};
