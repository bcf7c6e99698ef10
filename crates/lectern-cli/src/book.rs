//! Book manifests
//!
//! A manifest is a JSON file naming a book and listing its resources in
//! playback order, as delivered by the library service.

use std::fs;
use std::path::Path;

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };

use lectern_core::ResourceEntry;


#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct BookManifest {
    pub id: String,
    pub name: String,
    #[serde( default )]
    pub resources: Vec<ResourceEntry>,
}


impl BookManifest {
    pub fn load( path: &Path ) -> Result<Self> {
        let contents = fs::read_to_string( path )
            .with_context( || format!( "Failed to read book manifest {:?}", path ) )?;
        serde_json::from_str( &contents )
            .with_context( || format!( "Invalid book manifest {:?}", path ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "book.json" );
        fs::write( &path, r#"{
            "id": "42",
            "name": "Moby Dick",
            "resources": [
                { "mime_type": "audio/mpeg", "uri": "https://example.com/1.mp3", "local_uri": "01.mp3", "size": 1024 },
                { "mime_type": "image/jpeg", "uri": "https://example.com/c.jpg", "local_uri": "cover.jpg", "size": 10 }
            ]
        }"# ).unwrap();

        let book = BookManifest::load( &path ).unwrap();
        assert_eq!( book.id, "42" );
        assert_eq!( book.name, "Moby Dick" );
        assert_eq!( book.resources.len(), 2 );
        assert_eq!( book.resources[ 0 ].local_uri, "01.mp3" );
    }


    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "missing.json" );
        let err = BookManifest::load( &path ).unwrap_err();
        assert!( format!( "{:#}", err ).contains( "missing.json" ) );
    }
}
