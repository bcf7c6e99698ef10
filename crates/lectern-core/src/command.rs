//! Text command parsing and execution.
//!
//! Commands are typed one per line by the user and either act on the open
//! book's player or on the session around it (opening and closing books,
//! printing status, quitting).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::player::{ Player, DEFAULT_SPEED };


/// Speed change per `faster`/`slower` step.
pub const SPEED_STEP: f64 = 0.1;


/// Errors that can occur during command parsing.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Playback commands
    PlayPause,
    Stop,
    Next,
    Prev,
    /// Zero-based fragment; users type it one-based
    Track { fragment: isize },
    Faster,
    Slower,
    Speed { speed: Option<f64> },
    Louder,
    Quieter,
    Seek { position: Duration },
    Forward { amount: Duration },
    Back { amount: Duration },

    // Session commands
    Open { path: PathBuf },
    Close,
    Status,
    Help,
    Quit,
}


impl Command {
    /// Parses a command line.
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Playback commands
            "play" | "p" | "pause" => Ok( Command::PlayPause ),
            "stop" | "s" => Ok( Command::Stop ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "track" | "t" => {
                let number = args
                    .ok_or_else( || CommandError::MissingArgument( "track number".into() ) )?;
                let number: isize = number.parse()
                    .map_err( |_| CommandError::InvalidArgument( format!( "Invalid track number: {}", number ) ) )?;
                Ok( Command::Track { fragment: number.saturating_sub( 1 ) } )
            }
            "faster" | "+" => Ok( Command::Faster ),
            "slower" | "-" => Ok( Command::Slower ),
            "speed" => {
                let speed = args
                    .map( |s| s.parse::<f64>()
                        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid speed: {}", s ) ) ) )
                    .transpose()?;
                Ok( Command::Speed { speed } )
            }
            "louder" | "vol+" => Ok( Command::Louder ),
            "quieter" | "vol-" => Ok( Command::Quieter ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                Ok( Command::Seek { position: parse_time( time_str )? } )
            }
            "fwd" | "forward" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "seconds".into() ) )?;
                Ok( Command::Forward { amount: parse_time( time_str )? } )
            }
            "back" | "bk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "seconds".into() ) )?;
                Ok( Command::Back { amount: parse_time( time_str )? } )
            }

            // Session commands
            "open" | "o" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Open { path: PathBuf::from( path ) } )
            }
            "close" => Ok( Command::Close ),
            "status" | "st" => Ok( Command::Status ),
            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns true for commands that act on the player.
    pub fn is_playback( &self ) -> bool {
        !matches!(
            self,
            Command::Open { .. } | Command::Close | Command::Status | Command::Help | Command::Quit
        )
    }


    /// Runs a playback command against the open book's player.
    ///
    /// Without an open book, and for session commands, this does nothing.
    pub fn apply( &self, player: Option<&Player> ) {
        let Some( player ) = player else {
            if self.is_playback() {
                tracing::debug!( "No book open, ignoring {:?}", self );
            }
            return;
        };

        match self {
            Command::PlayPause => player.play_pause(),
            Command::Stop => player.stop(),
            Command::Next => player.change_track( 1 ),
            Command::Prev => player.change_track( -1 ),
            Command::Track { fragment } => player.set_track( *fragment ),
            Command::Faster => player.change_speed( SPEED_STEP ),
            Command::Slower => player.change_speed( -SPEED_STEP ),
            Command::Speed { speed } => player.set_speed( speed.unwrap_or( DEFAULT_SPEED ) ),
            Command::Louder => player.change_volume( 1 ),
            Command::Quieter => player.change_volume( -1 ),
            Command::Seek { position } => player.rewind( *position ),
            Command::Forward { amount } => player.rewind( player.elapsed().saturating_add( *amount ) ),
            Command::Back { amount } => player.rewind( player.elapsed().saturating_sub( *amount ) ),
            Command::Open { .. } | Command::Close | Command::Status | Command::Help | Command::Quit => {}
        }
    }
}


/// Parses a time string like "1:30", "1:02:03" or "90" into a Duration.
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();
    let mut seconds: u64 = 0;

    for part in s.split( ':' ) {
        let value: u64 = part.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        seconds = seconds
            .checked_mul( 60 )
            .and_then( |total| total.checked_add( value ) )
            .ok_or_else( || CommandError::InvalidArgument( format!( "Time out of range: {}", s ) ) )?;
    }

    Ok( Duration::from_secs( seconds ) )
}


/// Formats a duration as "M:SS" or "H:MM:SS".
pub fn format_time( duration: Duration ) -> String {
    let total = duration.as_secs();
    let ( hours, minutes, seconds ) = ( total / 3600, total / 60 % 60, total % 60 );
    if hours > 0 {
        format!( "{}:{:02}:{:02}", hours, minutes, seconds )
    } else {
        format!( "{}:{:02}", minutes, seconds )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Playback Commands:
  play, p         Play or pause
  stop, s         Stop and remember the position
  next, n         Next fragment
  prev, pr        Previous fragment
  track <n>       Jump to fragment n
  seek <time>     Seek to position (e.g., 1:30)
  fwd <time>      Skip forward
  back <time>     Skip back

Speed and Volume:
  faster, +       Speed up by 0.1x
  slower, -       Slow down by 0.1x
  speed [x]       Set speed (0.5 - 3.0), resets without a value
  louder, vol+    Increase volume
  quieter, vol-   Decrease volume

Other Commands:
  open <path>     Open a book manifest
  close           Close the book
  status, st      Show playback status
  help, ?         Show this help
  quit, q         Exit lectern"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play_aliases() {
        assert_eq!( Command::parse( "play" ).unwrap(), Command::PlayPause );
        assert_eq!( Command::parse( "  P  " ).unwrap(), Command::PlayPause );
    }


    #[test]
    fn test_parse_track_is_one_based() {
        assert_eq!( Command::parse( "track 3" ).unwrap(), Command::Track { fragment: 2 } );
        assert_eq!( Command::parse( "t 0" ).unwrap(), Command::Track { fragment: -1 } );
    }


    #[test]
    fn test_parse_speed() {
        assert_eq!( Command::parse( "speed 1.5" ).unwrap(), Command::Speed { speed: Some( 1.5 ) } );
        assert_eq!( Command::parse( "speed" ).unwrap(), Command::Speed { speed: None } );
        assert!( matches!( Command::parse( "speed fast" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_speed_and_volume_steps() {
        assert_eq!( Command::parse( "+" ).unwrap(), Command::Faster );
        assert_eq!( Command::parse( "-" ).unwrap(), Command::Slower );
        assert_eq!( Command::parse( "vol+" ).unwrap(), Command::Louder );
        assert_eq!( Command::parse( "quieter" ).unwrap(), Command::Quieter );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 90 ) } );
    }


    #[test]
    fn test_parse_seek_seconds() {
        let cmd = Command::parse( "seek 45" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 45 ) } );
    }


    #[test]
    fn test_parse_skip() {
        assert_eq!( Command::parse( "fwd 30" ).unwrap(), Command::Forward { amount: Duration::from_secs( 30 ) } );
        assert_eq!( Command::parse( "back 1:00" ).unwrap(), Command::Back { amount: Duration::from_secs( 60 ) } );
    }


    #[test]
    fn test_parse_open() {
        let cmd = Command::parse( "open /books/war and peace.json" ).unwrap();
        assert_eq!( cmd, Command::Open { path: PathBuf::from( "/books/war and peace.json" ) } );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "open" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "track  " ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_time_forms() {
        assert_eq!( parse_time( "1:02:03" ).unwrap(), Duration::from_secs( 3723 ) );
        assert_eq!( parse_time( "0:05" ).unwrap(), Duration::from_secs( 5 ) );
        assert!( parse_time( "1:xx" ).is_err() );
        assert!( parse_time( "" ).is_err() );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( Duration::from_secs( 5 ) ), "0:05" );
        assert_eq!( format_time( Duration::from_secs( 754 ) ), "12:34" );
        assert_eq!( format_time( Duration::from_secs( 3723 ) ), "1:02:03" );
    }


    #[test]
    fn test_apply_without_player_is_noop() {
        for input in [ "play", "stop", "next", "track 2", "faster", "louder", "seek 10", "back 5" ] {
            Command::parse( input ).unwrap().apply( None );
        }
    }


    struct Silent;


    impl crate::player::FragmentNotifier for Silent {
        fn set_fragments( &self, _current: usize, _total: usize ) {}
    }


    fn idle_player() -> Player {
        let services = crate::player::Services {
            resolver: crate::resolver::Resolver::new(
                std::env::temp_dir().join( "lectern-command-tests" ),
                std::sync::Arc::new( crate::connect::HttpConnector::new( Default::default() ) ),
            ),
            backend: std::sync::Arc::new( crate::track::AudioBackend ),
            bookmarks: std::sync::Arc::new( crate::bookmark::RecentBooks::in_memory() ),
            notifier: std::sync::Arc::new( Silent ),
        };
        Player::new( "id", "Book", Vec::new(), services )
    }


    #[test]
    fn test_skip_saturates_at_both_ends() {
        let player = idle_player();
        Command::parse( "seek 5" ).unwrap().apply( Some( &player ) );
        assert_eq!( player.elapsed(), Duration::from_secs( 5 ) );

        Command::parse( "fwd 18446744073709551615" ).unwrap().apply( Some( &player ) );
        assert_eq!( player.elapsed(), Duration::MAX );

        Command::parse( "seek 5" ).unwrap().apply( Some( &player ) );
        Command::parse( "back 1:00" ).unwrap().apply( Some( &player ) );
        assert_eq!( player.elapsed(), Duration::ZERO );
    }


    #[test]
    fn test_session_commands_are_not_playback() {
        assert!( Command::PlayPause.is_playback() );
        assert!( Command::Back { amount: Duration::ZERO }.is_playback() );
        assert!( !Command::Status.is_playback() );
        assert!( !Command::Open { path: PathBuf::new() }.is_playback() );
    }
}
