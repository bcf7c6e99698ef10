//! Lectern CLI - Command-line audio-book player

mod book;
mod cli;
mod settings;

use std::io::{ self, BufRead, Write };
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use lectern_core::{
    command::{ self, format_time },
    AudioBackend, Command, FragmentNotifier, HttpConnector, Player, RecentBooks, Resolver, Services,
};

use book::BookManifest;
use cli::Args;
use settings::Settings;


/// Prints fragment changes as they happen.
struct ConsoleNotifier;


impl FragmentNotifier for ConsoleNotifier {
    fn set_fragments( &self, current: usize, total: usize ) {
        println!( "Fragment {}/{}", current + 1, total );
    }
}


/// Application state.
struct App {
    resolver: Resolver,
    recent: Arc<RecentBooks>,
    /// The open book, if any
    player: Option<Player>,
    resume: bool,
    should_quit: bool,
}


impl App {
    /// Creates a new App instance.
    fn new( args: &Args, settings: &Settings ) -> Self {
        let user_data = args.user_data.clone().unwrap_or_else( || settings.user_data_dir() );
        tracing::debug!( "Book cache at {:?}", user_data );

        let connector = Arc::new( HttpConnector::new( settings.http_config() ) );
        let recent = match Settings::recent_books_path() {
            Some( path ) => RecentBooks::load( path ),
            None => RecentBooks::in_memory(),
        };

        Self {
            resolver: Resolver::new( user_data, connector ),
            recent: Arc::new( recent ),
            player: None,
            resume: !args.no_resume,
            should_quit: false,
        }
    }


    /// Opens a book manifest, closing the current book first.
    fn open( &mut self, path: &Path ) -> Result<()> {
        let manifest = BookManifest::load( path )?;
        self.close();

        let services = Services {
            resolver: self.resolver.clone(),
            backend: Arc::new( AudioBackend ),
            bookmarks: self.recent.clone(),
            notifier: Arc::new( ConsoleNotifier ),
        };
        let player = Player::new( manifest.id, manifest.name, manifest.resources, services );

        if player.is_empty() {
            println!( "{} has no playable fragments", player.book_name() );
        }

        if self.resume {
            if let Some( bookmark ) = self.recent.get_book( player.book_id() ) {
                tracing::info!(
                    "Resuming {} at fragment {}, {}",
                    bookmark.book_name,
                    bookmark.fragment + 1,
                    format_time( bookmark.elapsed )
                );
                player.set_track( bookmark.fragment as isize );
                player.rewind( bookmark.elapsed );
            }
        }

        println!( "Opened {} ({} fragments)", player.book_name(), player.len() );
        self.player = Some( player );
        Ok(())
    }


    /// Closes the open book; dropping the player records its position.
    fn close( &mut self ) {
        if let Some( player ) = self.player.take() {
            println!( "Closed {}", player.book_name() );
        }
    }


    fn status( &self ) -> String {
        let Some( player ) = self.player.as_ref() else {
            return "No book open".to_string();
        };

        let state = if player.is_paused() {
            "paused"
        } else if player.is_playing() {
            "playing"
        } else {
            "stopped"
        };

        format!(
            "{}: {} fragment {}/{} at {}, {:.1}x",
            player.book_name(),
            state,
            player.fragment() + 1,
            player.len(),
            format_time( player.elapsed() ),
            player.speed()
        )
    }


    /// Lists recently read books with their saved positions.
    fn recent_books( &self ) -> String {
        let books = self.recent.books();
        if books.is_empty() {
            return String::new();
        }

        let mut out = String::from( "Recent books:\n" );
        for book in books {
            out.push_str( &format!(
                "  {} (fragment {} at {})\n",
                book.book_name,
                book.fragment + 1,
                format_time( book.elapsed )
            ));
        }
        out
    }


    /// Parses and runs one line of user input.
    fn handle_line( &mut self, line: &str ) {
        if line.trim().is_empty() {
            return;
        }

        let cmd = match Command::parse( line ) {
            Ok( cmd ) => cmd,
            Err( e ) => {
                println!( "{} (type 'help' for commands)", e );
                return;
            }
        };

        match &cmd {
            Command::Open { path } => {
                if let Err( e ) = self.open( path ) {
                    println!( "{:#}", e );
                }
            }
            Command::Close => self.close(),
            Command::Status => println!( "{}", self.status() ),
            Command::Help => println!( "{}", command::help_text() ),
            Command::Quit => self.should_quit = true,
            _ => {
                if self.player.is_none() {
                    println!( "No book open" );
                }
                cmd.apply( self.player.as_ref() );
            }
        }
    }
}


fn init_logging( verbose: bool ) {
    let default_filter = if verbose {
        "lectern=debug,lectern_core=debug"
    } else {
        "lectern=info,lectern_core=info"
    };

    tracing_subscriber::registry()
        .with( EnvFilter::try_from_default_env().unwrap_or_else( |_| default_filter.into() ) )
        .with( tracing_subscriber::fmt::layer().with_writer( io::stderr ) )
        .init();
}


fn main() -> Result<()> {
    let args = Args::parse();
    init_logging( args.verbose );

    // Writing back fills in any settings the file is missing
    let settings = Settings::load();
    settings.save();
    let mut app = App::new( &args, &settings );

    if let Some( path ) = args.book.as_deref() {
        app.open( path )?;
        if args.play {
            Command::PlayPause.apply( app.player.as_ref() );
        }
    } else {
        print!( "{}", app.recent_books() );
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    while !app.should_quit {
        print!( "> " );
        io::stdout().flush()?;

        let Some( line ) = lines.next() else {
            break;
        };
        app.handle_line( &line? );
    }

    app.close();
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::fs;


    fn app_in( dir: &Path ) -> App {
        let args = Args::parse_from([ "lectern", "--user-data", dir.to_str().unwrap() ]);
        let mut app = App::new( &args, &Settings::default() );
        app.recent = Arc::new( RecentBooks::in_memory() );
        app
    }


    #[test]
    fn test_status_without_book() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in( dir.path() );
        assert_eq!( app.status(), "No book open" );

        // Playback commands are ignored without a book
        app.handle_line( "next" );
        app.handle_line( "play" );
        app.handle_line( "bogus" );
        assert!( app.player.is_none() );
    }


    #[test]
    fn test_recent_books_listing() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in( dir.path() );
        assert_eq!( app.recent_books(), "" );

        lectern_core::BookmarkStore::set_book(
            app.recent.as_ref(), "a", "First", 0, std::time::Duration::from_secs( 5 ),
        );
        lectern_core::BookmarkStore::set_book(
            app.recent.as_ref(), "b", "Second", 2, std::time::Duration::from_secs( 61 ),
        );
        assert_eq!(
            app.recent_books(),
            "Recent books:\n  Second (fragment 3 at 1:01)\n  First (fragment 1 at 0:05)\n"
        );
    }


    #[test]
    fn test_open_resumes_bookmark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "book.json" );
        fs::write( &path, r#"{
            "id": "b1",
            "name": "Resumed",
            "resources": [
                { "mime_type": "audio/mpeg", "uri": "http://127.0.0.1:9/1.mp3", "local_uri": "1.mp3", "size": 1 },
                { "mime_type": "audio/mpeg", "uri": "http://127.0.0.1:9/2.mp3", "local_uri": "2.mp3", "size": 1 }
            ]
        }"# ).unwrap();

        let mut app = app_in( dir.path() );
        lectern_core::BookmarkStore::set_book(
            app.recent.as_ref(), "b1", "Resumed", 1, std::time::Duration::from_secs( 75 ),
        );

        app.handle_line( &format!( "open {}", path.display() ) );
        let player = app.player.as_ref().unwrap();
        assert_eq!( player.fragment(), 1 );
        assert_eq!( player.elapsed(), std::time::Duration::from_secs( 75 ) );
        assert_eq!( app.status(), "Resumed: stopped fragment 2/2 at 1:15, 1.0x" );

        app.handle_line( "quit" );
        assert!( app.should_quit );
    }
}
