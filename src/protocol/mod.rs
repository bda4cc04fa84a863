mod dictionary;
pub use dictionary::Dictionary;

/// HTTP headers are stored in the same insertion-ordered multimap used for
/// query and cookie parameters.
pub type Headers = Dictionary;

mod message;
pub use message::MessageParts;
pub use message::CONNECTION;
pub use message::CONTENT_LENGTH;
pub use message::CONTENT_TYPE;
pub use message::CONTENT_TYPE_URLENCODED;
pub use message::COOKIE;
pub use message::SET_COOKIE;
pub use message::TRANSFER_ENCODING;

mod request;
pub use request::Request;

mod response;
pub use response::Response;
pub use response::SetCookie;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
