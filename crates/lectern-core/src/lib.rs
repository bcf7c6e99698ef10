//! Lectern Core - Audio-book playback engine
//!
//! This crate provides the core functionality for listening to audio books:
//! resolving fragments from a local cache or the network, deciphering LKF
//! containers, decoding, speed-adjusted output and resume bookmarks.

pub mod bookmark;
pub mod command;
pub mod connect;
pub mod decoder;
pub mod format;
pub mod lkf;
pub mod output;
pub mod player;
pub mod resolver;
pub mod resource;
pub mod track;
pub mod util;

pub use bookmark::{ Bookmark, BookmarkError, BookmarkStore, RecentBooks };
pub use command::{ Command, CommandError };
pub use connect::{ ConnectError, Connector, HttpConfig, HttpConnector, MediaStream };
pub use player::{ FragmentNotifier, Player, Services };
pub use resolver::{ ResolveError, Resolver };
pub use resource::{ MediaFormat, Resource, ResourceEntry };
pub use track::{ AudioBackend, Track, TrackBackend, TrackError };
