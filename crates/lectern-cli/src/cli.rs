//! Command-line argument parsing for Lectern.

use std::path::PathBuf;

use clap::Parser;


/// Lectern - A command-line audio-book player.
#[derive( Parser, Debug )]
#[command( name = "lectern" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Book manifest (JSON) to open on startup.
    pub book: Option<PathBuf>,

    /// Directory holding cached books, overrides the settings file.
    #[arg( short, long )]
    pub user_data: Option<PathBuf>,

    /// Start from the first fragment instead of the saved position.
    #[arg( long )]
    pub no_resume: bool,

    /// Start playing as soon as the book is open.
    #[arg( short, long )]
    pub play: bool,

    /// Log debug output to stderr.
    #[arg( short, long )]
    pub verbose: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_book_and_flags() {
        let args = Args::parse_from([ "lectern", "book.json", "--no-resume", "-p" ]);
        assert_eq!( args.book, Some( PathBuf::from( "book.json" ) ) );
        assert!( args.no_resume );
        assert!( args.play );
        assert!( !args.verbose );
    }


    #[test]
    fn test_parse_defaults() {
        let args = Args::parse_from([ "lectern" ]);
        assert!( args.book.is_none() );
        assert!( args.user_data.is_none() );
    }
}
