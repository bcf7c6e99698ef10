//! Book resources and playlist construction
//!
//! A book arrives as an ordered list of raw entries. Only entries whose
//! MIME type the player can decode make it into the playlist.

use std::fmt;

use serde::{ Deserialize, Serialize };


/// MIME type of plain MP3 content.
pub const MP3_FORMAT: &str = "audio/mpeg";

/// MIME type of LKF-enciphered MP3 content.
pub const LKF_FORMAT: &str = "audio/x-lkf";


/// Media formats the player can decode.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum MediaFormat {
    Mp3,
    Lkf,
}


impl MediaFormat {
    /// Maps a MIME type string to a supported format.
    pub fn from_mime( mime_type: &str ) -> Option<Self> {
        match mime_type {
            MP3_FORMAT => Some( MediaFormat::Mp3 ),
            LKF_FORMAT => Some( MediaFormat::Lkf ),
            _ => None,
        }
    }


    /// Returns the MIME type string for this format.
    pub fn mime_type( &self ) -> &'static str {
        match self {
            MediaFormat::Mp3 => MP3_FORMAT,
            MediaFormat::Lkf => LKF_FORMAT,
        }
    }
}


impl fmt::Display for MediaFormat {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.mime_type() )
    }
}


/// Raw resource description as delivered by the library service.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct ResourceEntry {
    pub mime_type: String,
    pub uri: String,
    pub local_uri: String,
    pub size: u64,
}


/// A playable resource with a supported format.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Resource {
    pub format: MediaFormat,
    pub uri: String,
    /// Path relative to the book's cache directory.
    pub local_uri: String,
    /// Expected size in bytes, used to validate cached copies.
    pub size: u64,
}


impl Resource {
    /// Converts a raw entry, or returns None if its format is unsupported.
    pub fn from_entry( entry: ResourceEntry ) -> Option<Self> {
        let format = MediaFormat::from_mime( &entry.mime_type )?;
        Some( Self {
            format,
            uri: entry.uri,
            local_uri: entry.local_uri,
            size: entry.size,
        })
    }
}


/// Builds a playlist from raw entries, dropping unsupported formats.
///
/// Relative order of the surviving entries is preserved.
pub fn build_playlist( entries: impl IntoIterator<Item = ResourceEntry> ) -> Vec<Resource> {
    entries
        .into_iter()
        .filter_map( |entry| {
            let uri = entry.uri.clone();
            let resource = Resource::from_entry( entry );
            if resource.is_none() {
                tracing::debug!( "Skipping unsupported resource: {}", uri );
            }
            resource
        })
        .collect()
}


#[cfg( test )]
mod tests {
    use super::*;


    fn entry( mime_type: &str, uri: &str ) -> ResourceEntry {
        ResourceEntry {
            mime_type: mime_type.to_string(),
            uri: uri.to_string(),
            local_uri: format!( "{}.mp3", uri ),
            size: 1024,
        }
    }


    #[test]
    fn test_from_mime() {
        assert_eq!( MediaFormat::from_mime( "audio/mpeg" ), Some( MediaFormat::Mp3 ) );
        assert_eq!( MediaFormat::from_mime( "audio/x-lkf" ), Some( MediaFormat::Lkf ) );
        assert_eq!( MediaFormat::from_mime( "text/html" ), None );
        assert_eq!( MediaFormat::from_mime( "AUDIO/MPEG" ), None );
    }


    #[test]
    fn test_playlist_filters_unsupported() {
        let playlist = build_playlist( vec![
            entry( MP3_FORMAT, "a" ),
            entry( "application/smil", "b" ),
            entry( LKF_FORMAT, "c" ),
        ]);

        let uris: Vec<&str> = playlist.iter().map( |r| r.uri.as_str() ).collect();
        assert_eq!( uris, vec![ "a", "c" ] );
        assert_eq!( playlist[ 0 ].format, MediaFormat::Mp3 );
        assert_eq!( playlist[ 1 ].format, MediaFormat::Lkf );
    }


    #[test]
    fn test_entry_deserialize() {
        let json = r#"{"mime_type":"audio/mpeg","uri":"http://x/1.mp3","local_uri":"1.mp3","size":42}"#;
        let parsed: ResourceEntry = serde_json::from_str( json ).unwrap();
        assert_eq!( parsed.size, 42 );
        assert_eq!( Resource::from_entry( parsed ).unwrap().local_uri, "1.mp3" );
    }
}
