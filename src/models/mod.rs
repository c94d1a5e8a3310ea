pub mod bookmark;
pub mod user;

pub use bookmark::{Bookmark, NewBookmark};
pub use user::{AuthUser, Session, TokenClaims};
