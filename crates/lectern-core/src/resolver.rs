//! Resource resolution
//!
//! Chooses between a previously downloaded copy of a resource and a fresh
//! network stream. A cached file is only trusted when its size matches the
//! size the library declared for the resource.

use std::fmt;
use std::fs::{ self, File };
use std::path::{ Component, Path, PathBuf };
use std::sync::Arc;

use thiserror::Error;

use crate::connect::{ ConnectError, Connector, MediaStream };
use crate::resource::Resource;


/// Errors that can occur while resolving a resource.
#[derive( Debug, Error )]
pub enum ResolveError {
    #[error( "Failed to open network stream: {0}" )]
    Network( #[from] ConnectError ),
}


/// Where a resolved stream comes from.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Origin {
    Cache( PathBuf ),
    Network( String ),
}


impl fmt::Display for Origin {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            Origin::Cache( path ) => write!( f, "{}", path.display() ),
            Origin::Network( uri ) => f.write_str( uri ),
        }
    }
}


/// An opened resource stream.
pub struct Source {
    pub stream: MediaStream,
    pub origin: Origin,
}


/// Resolves resources to readable streams.
#[derive( Clone )]
pub struct Resolver {
    user_data: PathBuf,
    connector: Arc<dyn Connector>,
}


impl Resolver {
    /// Creates a resolver rooted at the user-data directory.
    pub fn new( user_data: impl Into<PathBuf>, connector: Arc<dyn Connector> ) -> Self {
        Self {
            user_data: user_data.into(),
            connector,
        }
    }


    /// Computes where a cached copy of `resource` would live.
    ///
    /// `book_dir` must already be sanitized. Returns None when the resource's
    /// local path would leave the book directory.
    pub fn cache_path( &self, book_dir: &str, resource: &Resource ) -> Option<PathBuf> {
        let local = Path::new( &resource.local_uri );
        let contained = local.components().next().is_some()
            && local.components().all( |c| matches!( c, Component::Normal( _ ) | Component::CurDir ) );
        if !contained {
            tracing::warn!( "Not caching {}: local path {:?} is outside the book", resource.uri, local );
            return None;
        }

        Some( self.user_data.join( book_dir ).join( local ) )
    }


    /// Opens `resource`, preferring a valid cached copy.
    pub fn resolve( &self, resource: &Resource, book_dir: &str ) -> Result<Source, ResolveError> {
        if let Some( path ) = self.cache_path( book_dir, resource ) {
            if let Some( file ) = open_cached( &path, resource.size ) {
                return Ok( Source {
                    stream: Box::new( file ),
                    origin: Origin::Cache( path ),
                });
            }
        }

        // Not on disk, fetch it from the network
        let stream = self.connector.open( &resource.uri )?;
        Ok( Source {
            stream,
            origin: Origin::Network( resource.uri.clone() ),
        })
    }
}


/// Opens `path` if it is a regular file of exactly `size` bytes.
fn open_cached( path: &Path, size: u64 ) -> Option<File> {
    let metadata = fs::metadata( path ).ok()?;
    if metadata.is_dir() || metadata.len() != size {
        tracing::debug!(
            "Ignoring cached {:?}: {} bytes, expected {}",
            path,
            metadata.len(),
            size
        );
        return None;
    }

    match File::open( path ) {
        Ok( file ) => Some( file ),
        Err( e ) => {
            tracing::warn!( "Failed to open cached {:?}: {}", path, e );
            None
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Cursor, Read };

    use crate::resource::MediaFormat;


    struct FakeConnector {
        fail: bool,
    }


    impl Connector for FakeConnector {
        fn open( &self, uri: &str ) -> Result<MediaStream, ConnectError> {
            if self.fail {
                Err( ConnectError::Status { uri: uri.to_string(), status: 404 } )
            } else {
                Ok( Box::new( Cursor::new( b"network".to_vec() ) ) )
            }
        }
    }


    fn resource( size: u64 ) -> Resource {
        Resource {
            format: MediaFormat::Mp3,
            uri: "http://library/book/01.mp3".to_string(),
            local_uri: "01.mp3".to_string(),
            size,
        }
    }


    fn resolver( root: &Path, fail: bool ) -> Resolver {
        Resolver::new( root, Arc::new( FakeConnector { fail } ) )
    }


    fn read_all( source: Source ) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = source.stream;
        stream.read_to_end( &mut out ).unwrap();
        out
    }


    #[test]
    fn test_cache_path_layout() {
        let r = resolver( Path::new( "/data" ), false );
        assert_eq!(
            r.cache_path( "My Book", &resource( 1 ) ),
            Some( PathBuf::from( "/data/My Book/01.mp3" ) )
        );
    }


    #[test]
    fn test_local_paths_outside_book_are_not_cached() {
        let r = resolver( Path::new( "/data" ), false );
        for local_uri in [ "../other/01.mp3", "/etc/passwd", "disc1/../../01.mp3", "" ] {
            let escaping = Resource { local_uri: local_uri.to_string(), ..resource( 1 ) };
            assert_eq!( r.cache_path( "Book", &escaping ), None, "{}", local_uri );
        }

        let nested = Resource { local_uri: "disc1/01.mp3".to_string(), ..resource( 1 ) };
        assert_eq!( r.cache_path( "Book", &nested ), Some( PathBuf::from( "/data/Book/disc1/01.mp3" ) ) );
    }


    #[test]
    fn test_escaping_file_is_fetched_from_network() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all( dir.path().join( "Book" ) ).unwrap();
        fs::write( dir.path().join( "secret.mp3" ), b"cached!" ).unwrap();

        let escaping = Resource { local_uri: "../secret.mp3".to_string(), ..resource( 7 ) };
        let source = resolver( dir.path(), false ).resolve( &escaping, "Book" ).unwrap();
        assert!( matches!( source.origin, Origin::Network( _ ) ) );
        assert_eq!( read_all( source ), b"network" );
    }


    #[test]
    fn test_cache_hit_on_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all( dir.path().join( "Book" ) ).unwrap();
        fs::write( dir.path().join( "Book/01.mp3" ), b"cached!" ).unwrap();

        let source = resolver( dir.path(), true ).resolve( &resource( 7 ), "Book" ).unwrap();
        assert!( matches!( source.origin, Origin::Cache( _ ) ) );
        assert_eq!( read_all( source ), b"cached!" );
    }


    #[test]
    fn test_size_mismatch_falls_back_to_network() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all( dir.path().join( "Book" ) ).unwrap();
        fs::write( dir.path().join( "Book/01.mp3" ), b"cached!" ).unwrap();

        for size in [ 6, 8 ] {
            let source = resolver( dir.path(), false ).resolve( &resource( size ), "Book" ).unwrap();
            assert!( matches!( source.origin, Origin::Network( _ ) ) );
            assert_eq!( read_all( source ), b"network" );
        }
    }


    #[test]
    fn test_directory_is_not_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all( dir.path().join( "Book/01.mp3" ) ).unwrap();
        let size = fs::metadata( dir.path().join( "Book/01.mp3" ) ).unwrap().len();

        let source = resolver( dir.path(), false ).resolve( &resource( size ), "Book" ).unwrap();
        assert!( matches!( source.origin, Origin::Network( _ ) ) );
    }


    #[test]
    fn test_network_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolver( dir.path(), true ).resolve( &resource( 7 ), "Book" );
        assert!( matches!( result, Err( ResolveError::Network( ConnectError::Status { status: 404, .. } ) ) ) );
    }
}
