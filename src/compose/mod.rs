pub mod compositor;
pub mod layout;
pub mod sprite;
pub mod timeline;
