//! Resume bookmarks
//!
//! Remembers where each recently read book was stopped so that it can be
//! resumed the next time it is opened.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use parking_lot::Mutex;
use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// How many books the recent list keeps.
pub const MAX_RECENT_BOOKS: usize = 10;


/// Errors that can occur while persisting bookmarks.
#[derive( Debug, Error )]
pub enum BookmarkError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Invalid bookmark file: {0}" )]
    Format( #[from] serde_json::Error ),
}


/// Position a book was stopped at.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Bookmark {
    pub book_id: String,
    pub book_name: String,
    pub fragment: usize,
    pub elapsed: Duration,
}


/// Receives the resume position whenever playback of a book stops.
pub trait BookmarkStore: Send + Sync {
    fn set_book( &self, book_id: &str, book_name: &str, fragment: usize, elapsed: Duration );
}


/// Recently read books, most recent first, optionally backed by a JSON file.
#[derive( Debug, Default )]
pub struct RecentBooks {
    path: Option<PathBuf>,
    books: Mutex<Vec<Bookmark>>,
}


impl RecentBooks {
    /// Creates an empty list that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }


    /// Loads the list from `path`, starting empty if the file is missing or unreadable.
    pub fn load( path: impl Into<PathBuf> ) -> Self {
        let path = path.into();
        let books = match Self::read( &path ) {
            Ok( books ) => books,
            Err( BookmarkError::Io( ref e ) ) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err( e ) => {
                tracing::warn!( "Failed to read recent books from {:?}: {}", path, e );
                Vec::new()
            }
        };

        Self {
            path: Some( path ),
            books: Mutex::new( books ),
        }
    }


    fn read( path: &Path ) -> Result<Vec<Bookmark>, BookmarkError> {
        let contents = fs::read_to_string( path )?;
        Ok( serde_json::from_str( &contents )? )
    }


    /// Writes the list to its backing file, if any.
    pub fn save( &self ) -> Result<(), BookmarkError> {
        let Some( path ) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some( parent ) = path.parent() {
            fs::create_dir_all( parent )?;
        }

        let json = serde_json::to_string_pretty( &*self.books.lock() )?;
        fs::write( path, json )?;
        Ok(())
    }


    /// Returns the bookmark for `book_id`, if the book was read recently.
    pub fn get_book( &self, book_id: &str ) -> Option<Bookmark> {
        self.books.lock().iter().find( |b| b.book_id == book_id ).cloned()
    }


    /// Returns all bookmarks, most recent first.
    pub fn books( &self ) -> Vec<Bookmark> {
        self.books.lock().clone()
    }
}


impl BookmarkStore for RecentBooks {
    fn set_book( &self, book_id: &str, book_name: &str, fragment: usize, elapsed: Duration ) {
        {
            let mut books = self.books.lock();
            books.retain( |b| b.book_id != book_id );
            books.insert( 0, Bookmark {
                book_id: book_id.to_string(),
                book_name: book_name.to_string(),
                fragment,
                elapsed,
            });
            books.truncate( MAX_RECENT_BOOKS );
        }

        if let Err( e ) = self.save() {
            tracing::warn!( "Failed to save recent books: {}", e );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_set_book_overwrites_and_moves_to_front() {
        let recent = RecentBooks::in_memory();
        recent.set_book( "1", "First", 0, Duration::ZERO );
        recent.set_book( "2", "Second", 3, Duration::from_secs( 5 ) );
        recent.set_book( "1", "First", 7, Duration::from_secs( 42 ) );

        let books = recent.books();
        assert_eq!( books.len(), 2 );
        assert_eq!( books[ 0 ].book_id, "1" );
        assert_eq!( books[ 0 ].fragment, 7 );
        assert_eq!( books[ 0 ].elapsed, Duration::from_secs( 42 ) );
        assert_eq!( books[ 1 ].book_id, "2" );
    }


    #[test]
    fn test_list_is_capped() {
        let recent = RecentBooks::in_memory();
        for i in 0..MAX_RECENT_BOOKS + 3 {
            recent.set_book( &i.to_string(), "Book", 0, Duration::ZERO );
        }
        assert_eq!( recent.books().len(), MAX_RECENT_BOOKS );
        assert!( recent.get_book( "0" ).is_none() );
        assert!( recent.get_book( &( MAX_RECENT_BOOKS + 2 ).to_string() ).is_some() );
    }


    #[test]
    fn test_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "recent.json" );

        let recent = RecentBooks::load( &path );
        recent.set_book( "abc", "Some Book", 4, Duration::from_millis( 1500 ) );

        let reloaded = RecentBooks::load( &path );
        let bookmark = reloaded.get_book( "abc" ).unwrap();
        assert_eq!( bookmark.book_name, "Some Book" );
        assert_eq!( bookmark.fragment, 4 );
        assert_eq!( bookmark.elapsed, Duration::from_millis( 1500 ) );
    }


    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "recent.json" );
        fs::write( &path, "not json" ).unwrap();

        assert!( RecentBooks::load( &path ).books().is_empty() );
    }
}
