//! Application settings management
//!
//! Handles persistent settings for the cache location and network behaviour.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use lectern_core::HttpConfig;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Root directory of cached books; the platform data directory when unset
    pub user_data_dir: Option<PathBuf>,

    /// Seconds to wait for a connection
    pub connect_timeout_secs: u64,

    /// Seconds to wait for data on an open connection
    pub read_timeout_secs: u64,

    /// Times a broken download may be resumed
    pub reconnect_attempts: u32,
}


impl Default for Settings {
    fn default() -> Self {
        let http = HttpConfig::default();
        Self {
            user_data_dir: None,
            connect_timeout_secs: http.connect_timeout.as_secs(),
            read_timeout_secs: http.read_timeout.as_secs(),
            reconnect_attempts: http.reconnect_attempts,
        }
    }
}


impl Settings {
    /// Returns the application config directory.
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "lectern" ) )
    }


    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map( |p| p.join( "settings.json" ) )
    }


    /// Returns the path of the recent books list.
    pub fn recent_books_path() -> Option<PathBuf> {
        Self::config_dir().map( |p| p.join( "recent_books.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => {
                serde_json::from_str( &contents ).unwrap_or_else( |e| {
                    tracing::warn!( "Ignoring malformed settings: {}", e );
                    Self::default()
                })
            }
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        if let Some( path ) = Self::settings_path() {
            self.save_to( &path );
        }
    }


    fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Resolves the cache root, falling back to the platform data directory.
    pub fn user_data_dir( &self ) -> PathBuf {
        self.user_data_dir.clone()
            .or_else( || dirs::data_dir().map( |p| p.join( "lectern" ).join( "books" ) ) )
            .unwrap_or_else( || PathBuf::from( "books" ) )
    }


    /// HTTP client settings for the network connector.
    pub fn http_config( &self ) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs( self.connect_timeout_secs ),
            read_timeout: Duration::from_secs( self.read_timeout_secs ),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!( Settings::load_from( &dir.path().join( "none.json" ) ), Settings::default() );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "read_timeout_secs": 5 }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.read_timeout_secs, 5 );
        assert_eq!( settings.reconnect_attempts, Settings::default().reconnect_attempts );
        assert_eq!( settings.http_config().read_timeout, Duration::from_secs( 5 ) );
    }


    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "lectern" ).join( "settings.json" );

        let settings = Settings {
            user_data_dir: Some( PathBuf::from( "/srv/books" ) ),
            ..Settings::default()
        };
        settings.save_to( &path );

        let reloaded = Settings::load_from( &path );
        assert_eq!( reloaded, settings );
        assert_eq!( reloaded.user_data_dir(), PathBuf::from( "/srv/books" ) );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "{ nope" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }
}
