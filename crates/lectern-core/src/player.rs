//! Playback controller
//!
//! A `Player` owns one book's playlist and runs at most one playback worker
//! at a time. The worker walks the playlist from the current fragment,
//! resolving, decoding and playing each resource in turn. Control operations
//! only touch shared state under a short-lived lock; `stop` is the only call
//! that waits, and it returns once the worker has exited.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread::{ self, JoinHandle };
use std::time::Duration;

use parking_lot::Mutex;

use crate::bookmark::BookmarkStore;
use crate::format;
use crate::resolver::Resolver;
use crate::resource::{ build_playlist, Resource, ResourceEntry };
use crate::track::{ Track, TrackBackend };
use crate::util::sanitize_file_name;


pub const DEFAULT_SPEED: f64 = 1.0;
pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 3.0;

/// Gain change applied per volume step.
pub const VOLUME_STEP: i64 = 4096;


/// Receives fragment changes for display.
pub trait FragmentNotifier: Send + Sync {
    fn set_fragments( &self, current: usize, total: usize );
}


/// Collaborators a player relies on.
pub struct Services {
    pub resolver: Resolver,
    pub backend: Arc<dyn TrackBackend>,
    pub bookmarks: Arc<dyn BookmarkStore>,
    pub notifier: Arc<dyn FragmentNotifier>,
}


/// Immutable description of the open book.
struct Book {
    id: String,
    name: String,
    /// Sanitized name of the book's cache directory
    dir: String,
    playlist: Vec<Resource>,
}


/// Mutable playback state, always accessed under one lock.
struct State {
    fragment: usize,
    /// Start position for the next track created
    offset: Duration,
    /// Position reported when no track is active
    last_elapsed: Duration,
    speed: f64,
    pause: bool,
    track: Option<Arc<dyn Track>>,
}


struct Shared {
    state: Mutex<State>,
    /// Cleared to ask the worker to finish
    playing: AtomicBool,
}


/// Audio-book player for a single book.
pub struct Player {
    book: Arc<Book>,
    shared: Arc<Shared>,
    services: Arc<Services>,
    worker: Mutex<Option<JoinHandle<()>>>,
}


impl Player {
    /// Creates a player for a book, keeping only resources it can decode.
    pub fn new(
        book_id: impl Into<String>,
        book_name: impl Into<String>,
        resources: impl IntoIterator<Item = ResourceEntry>,
        services: Services,
    ) -> Self {
        let name = book_name.into();
        let book = Book {
            id: book_id.into(),
            dir: sanitize_file_name( &name ),
            name,
            playlist: build_playlist( resources ),
        };

        tracing::debug!( "Opened book {:?} with {} fragments", book.name, book.playlist.len() );

        Self {
            book: Arc::new( book ),
            shared: Arc::new( Shared {
                state: Mutex::new( State {
                    fragment: 0,
                    offset: Duration::ZERO,
                    last_elapsed: Duration::ZERO,
                    speed: DEFAULT_SPEED,
                    pause: false,
                    track: None,
                }),
                playing: AtomicBool::new( false ),
            }),
            services: Arc::new( services ),
            worker: Mutex::new( None ),
        }
    }


    pub fn book_id( &self ) -> &str {
        &self.book.id
    }


    pub fn book_name( &self ) -> &str {
        &self.book.name
    }


    /// The filtered playlist.
    pub fn playlist( &self ) -> &[Resource] {
        &self.book.playlist
    }


    pub fn len( &self ) -> usize {
        self.book.playlist.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.book.playlist.is_empty()
    }


    /// Index of the current fragment.
    pub fn fragment( &self ) -> usize {
        self.shared.state.lock().fragment
    }


    pub fn speed( &self ) -> f64 {
        self.shared.state.lock().speed
    }


    /// Returns true while a playback session is running.
    pub fn is_playing( &self ) -> bool {
        self.shared.playing.load( Ordering::SeqCst )
    }


    pub fn is_paused( &self ) -> bool {
        self.is_playing() && self.shared.state.lock().pause
    }


    /// Position within the current fragment.
    pub fn elapsed( &self ) -> Duration {
        let state = self.shared.state.lock();
        match state.track.as_ref() {
            Some( track ) => track.elapsed(),
            None => state.last_elapsed,
        }
    }


    /// Starts a new session at the current fragment, ending any running one.
    pub fn play( &self ) {
        let mut worker = self.worker.lock();
        self.stop_session( &mut worker );

        let start = {
            let mut state = self.shared.state.lock();
            state.pause = false;
            state.fragment
        };

        if start >= self.book.playlist.len() {
            tracing::debug!( "Nothing to play in {:?}", self.book.name );
            return;
        }

        self.shared.playing.store( true, Ordering::SeqCst );

        let session = Worker {
            book: Arc::clone( &self.book ),
            shared: Arc::clone( &self.shared ),
            services: Arc::clone( &self.services ),
        };

        let spawned = thread::Builder::new()
            .name( "lectern-playback".into() )
            .spawn( move || session.run( start ) );

        match spawned {
            Ok( handle ) => *worker = Some( handle ),
            Err( e ) => {
                tracing::error!( "Failed to start playback worker: {}", e );
                self.shared.playing.store( false, Ordering::SeqCst );
            }
        }
    }


    /// Starts playback if stopped, otherwise toggles pause on the current track.
    pub fn play_pause( &self ) {
        if !self.is_playing() {
            self.play();
            return;
        }

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if let Some( track ) = state.track.as_ref() {
            state.pause = !state.pause;
            track.pause( state.pause );
            tracing::info!( "{}", if state.pause { "Paused" } else { "Resumed" } );
        }
    }


    /// Ends the session, records a bookmark and waits for the worker to exit.
    pub fn stop( &self ) {
        let mut worker = self.worker.lock();
        self.stop_session( &mut worker );
    }


    fn stop_session( &self, worker: &mut Option<JoinHandle<()>> ) {
        self.shared.playing.store( false, Ordering::SeqCst );

        let ( fragment, elapsed ) = {
            let state = self.shared.state.lock();
            let elapsed = match state.track.as_ref() {
                Some( track ) => {
                    let elapsed = track.elapsed();
                    track.stop();
                    elapsed
                }
                None => state.last_elapsed,
            };
            ( state.fragment, elapsed )
        };

        self.services.bookmarks.set_book( &self.book.id, &self.book.name, fragment, elapsed );

        if let Some( handle ) = worker.take() {
            if handle.join().is_err() {
                tracing::error!( "Playback worker panicked" );
            }
            tracing::info!( "Stopped" );
        }
    }


    /// Moves to `fragment`, restarting playback there if a session is running.
    ///
    /// Negative fragments clamp to the first one; fragments past the end are ignored.
    pub fn set_track( &self, fragment: isize ) {
        {
            let mut state = self.shared.state.lock();
            let target = if fragment < 0 {
                0
            } else if fragment as usize >= self.book.playlist.len() {
                return;
            } else {
                fragment as usize
            };

            // A position remembered for another fragment does not carry over
            if target != state.fragment {
                state.fragment = target;
                state.last_elapsed = state.offset;
            }
        }

        if self.is_playing() {
            self.play();
        }
    }


    /// Moves `offset` fragments relative to the current one.
    pub fn change_track( &self, offset: isize ) {
        let fragment = self.shared.state.lock().fragment as isize;
        self.set_track( fragment.saturating_add( offset ) );
    }


    /// Sets playback speed, clamped to `[MIN_SPEED, MAX_SPEED]`.
    pub fn set_speed( &self, speed: f64 ) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        state.speed = if speed.is_nan() { DEFAULT_SPEED } else { speed.clamp( MIN_SPEED, MAX_SPEED ) };
        if let Some( track ) = state.track.as_ref() {
            track.set_speed( state.speed );
        }
    }


    pub fn change_speed( &self, offset: f64 ) {
        let speed = self.shared.state.lock().speed;
        self.set_speed( speed + offset );
    }


    /// Adjusts both channels of the current track by `offset` volume steps.
    ///
    /// Does nothing between tracks. The change is not carried over to later tracks.
    pub fn change_volume( &self, offset: i32 ) {
        let state = self.shared.state.lock();
        let Some( track ) = state.track.as_ref() else {
            return;
        };

        let delta = offset as i64 * VOLUME_STEP;
        let adjust = |gain: u16| ( gain as i64 + delta ).clamp( 0, u16::MAX as i64 ) as u16;

        let ( left, right ) = track.volume();
        track.set_volume( adjust( left ), adjust( right ) );
    }


    /// Moves to an absolute position in the current fragment.
    ///
    /// While stopped, the position is remembered and applied to the next track.
    pub fn rewind( &self, position: Duration ) {
        let track = {
            let mut state = self.shared.state.lock();
            if !self.is_playing() {
                state.offset = position;
                state.last_elapsed = position;
                return;
            }
            state.track.clone()
        };

        // Seeking may read ahead in the stream, keep it outside the lock
        if let Some( track ) = track {
            if let Err( e ) = track.rewind( position ) {
                tracing::warn!( "Rewind to {:?} failed: {}", position, e );
            }
        }
    }
}


impl Drop for Player {
    fn drop( &mut self ) {
        // Closing a book records where it was left
        self.stop();
    }
}


/// Clears the running flag when the worker exits, however it exits.
struct RunningGuard<'a>( &'a AtomicBool );


impl Drop for RunningGuard<'_> {
    fn drop( &mut self ) {
        self.0.store( false, Ordering::SeqCst );
    }
}


/// State the playback worker thread needs.
struct Worker {
    book: Arc<Book>,
    shared: Arc<Shared>,
    services: Arc<Services>,
}


impl Worker {
    fn cancelled( &self ) -> bool {
        !self.shared.playing.load( Ordering::SeqCst )
    }


    fn run( self, start: usize ) {
        let _running = RunningGuard( &self.shared.playing );
        let total = self.book.playlist.len();

        for ( index, resource ) in self.book.playlist.iter().enumerate().skip( start ) {
            let source = match self.services.resolver.resolve( resource, &self.book.dir ) {
                Ok( source ) => source,
                Err( e ) => {
                    tracing::error!( "Fragment {}: {}", index, e );
                    break;
                }
            };
            let origin = source.origin;
            let stream = format::dispatch( resource.format, source.stream );

            let ( speed, offset ) = {
                let mut state = self.shared.state.lock();
                ( state.speed, mem::take( &mut state.offset ) )
            };

            let track = match self.services.backend.open( stream, speed ) {
                Ok( track ) => track,
                Err( e ) => {
                    tracing::warn!( "New track for {}: {}", origin, e );
                    continue;
                }
            };

            if let Err( e ) = track.rewind( offset ) {
                tracing::warn!( "Track rewind for {}: {}", origin, e );
                continue;
            }

            {
                // Checked under the lock so a concurrent stop either sees this
                // track or makes us bail out here
                let mut state = self.shared.state.lock();
                if self.cancelled() {
                    tracing::debug!( "Session cancelled before {} started", origin );
                    break;
                }
                state.track = Some( Arc::clone( &track ) );
                state.fragment = index;
            }

            tracing::info!( "Playing {}: {}", origin, resource.format );
            self.services.notifier.set_fragments( index, total );
            track.play();
            tracing::info!( "Stopping {}: {}", origin, resource.format );

            {
                let mut state = self.shared.state.lock();
                state.track = None;
                state.last_elapsed = track.elapsed();
            }
            drop( track );

            if self.cancelled() {
                break;
            }
        }

        tracing::debug!( "Playback worker exiting" );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{ Cursor, Read };
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use proptest::prelude::*;

    use crate::bookmark::Bookmark;
    use crate::connect::{ ConnectError, Connector, MediaStream };
    use crate::decoder::DecoderError;
    use crate::resource::MP3_FORMAT;
    use crate::track::TrackError;


    const SHORT: Duration = Duration::from_millis( 10 );
    const LONG: Duration = Duration::from_secs( 30 );


    struct FakeConnector {
        offline: Vec<String>,
    }


    impl Connector for FakeConnector {
        fn open( &self, uri: &str ) -> Result<MediaStream, ConnectError> {
            if self.offline.iter().any( |u| u == uri ) {
                return Err( ConnectError::Status { uri: uri.to_string(), status: 503 } );
            }
            Ok( Box::new( Cursor::new( uri.as_bytes().to_vec() ) ) )
        }
    }


    struct FakeTrack {
        uri: String,
        length: Duration,
        max_seek: Duration,
        position: Mutex<Duration>,
        speed: Mutex<f64>,
        gain: Mutex<( u16, u16 )>,
        paused: AtomicBool,
        stopped: AtomicBool,
        rewinds: Mutex<Vec<Duration>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }


    impl Track for FakeTrack {
        fn play( &self ) {
            let now_active = self.active.fetch_add( 1, Ordering::SeqCst ) + 1;
            self.max_active.fetch_max( now_active, Ordering::SeqCst );

            let deadline = Instant::now() + self.length;
            while !self.stopped.load( Ordering::SeqCst ) && Instant::now() < deadline {
                thread::sleep( Duration::from_millis( 1 ) );
            }
            if !self.stopped.load( Ordering::SeqCst ) {
                *self.position.lock() = self.length;
            }

            self.active.fetch_sub( 1, Ordering::SeqCst );
        }

        fn pause( &self, paused: bool ) {
            self.paused.store( paused, Ordering::SeqCst );
        }

        fn stop( &self ) {
            self.stopped.store( true, Ordering::SeqCst );
        }

        fn set_speed( &self, speed: f64 ) {
            *self.speed.lock() = speed;
        }

        fn rewind( &self, position: Duration ) -> Result<(), TrackError> {
            self.rewinds.lock().push( position );
            if position > self.max_seek {
                return Err( TrackError::Decoder( DecoderError::Seek( "past end".into() ) ) );
            }
            *self.position.lock() = position;
            Ok(())
        }

        fn elapsed( &self ) -> Duration {
            *self.position.lock()
        }

        fn volume( &self ) -> ( u16, u16 ) {
            *self.gain.lock()
        }

        fn set_volume( &self, left: u16, right: u16 ) {
            *self.gain.lock() = ( left, right );
        }
    }


    #[derive( Default )]
    struct FakeBackend {
        lengths: HashMap<String, Duration>,
        default_length: Duration,
        broken: Vec<String>,
        max_seek: Option<Duration>,
        tracks: Mutex<Vec<Arc<FakeTrack>>>,
        speeds: Mutex<Vec<f64>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }


    impl TrackBackend for FakeBackend {
        fn open( &self, mut stream: MediaStream, speed: f64 ) -> Result<Arc<dyn Track>, TrackError> {
            let mut uri = String::new();
            stream.read_to_string( &mut uri ).unwrap();
            self.speeds.lock().push( speed );

            if self.broken.contains( &uri ) {
                return Err( TrackError::Decoder( DecoderError::UnsupportedFormat ) );
            }

            let track = Arc::new( FakeTrack {
                length: self.lengths.get( &uri ).copied().unwrap_or( self.default_length ),
                max_seek: self.max_seek.unwrap_or( Duration::MAX ),
                uri,
                position: Mutex::new( Duration::ZERO ),
                speed: Mutex::new( speed ),
                gain: Mutex::new( ( u16::MAX, u16::MAX ) ),
                paused: AtomicBool::new( false ),
                stopped: AtomicBool::new( false ),
                rewinds: Mutex::new( Vec::new() ),
                active: Arc::clone( &self.active ),
                max_active: Arc::clone( &self.max_active ),
            });
            self.tracks.lock().push( Arc::clone( &track ) );
            Ok( track )
        }
    }


    #[derive( Default )]
    struct Recorder {
        bookmarks: Mutex<Vec<Bookmark>>,
        fragments: Mutex<Vec<( usize, usize )>>,
    }


    impl BookmarkStore for Recorder {
        fn set_book( &self, book_id: &str, book_name: &str, fragment: usize, elapsed: Duration ) {
            self.bookmarks.lock().push( Bookmark {
                book_id: book_id.to_string(),
                book_name: book_name.to_string(),
                fragment,
                elapsed,
            });
        }
    }


    impl FragmentNotifier for Recorder {
        fn set_fragments( &self, current: usize, total: usize ) {
            self.fragments.lock().push(( current, total ));
        }
    }


    impl Recorder {
        fn fragments( &self ) -> Vec<( usize, usize )> {
            self.fragments.lock().clone()
        }

        fn bookmarks( &self ) -> Vec<Bookmark> {
            self.bookmarks.lock().clone()
        }
    }


    struct Harness {
        player: Player,
        backend: Arc<FakeBackend>,
        recorder: Arc<Recorder>,
    }


    impl Harness {
        fn track( &self, index: usize ) -> Arc<FakeTrack> {
            Arc::clone( &self.backend.tracks.lock()[ index ] )
        }

        fn wait_for_fragment( &self, fragment: usize ) -> Arc<FakeTrack> {
            let uri = format!( "res-{}", fragment );
            assert!( wait_until( || self.recorder.fragments().iter().any( |( f, _ )| *f == fragment ) ) );
            let tracks = self.backend.tracks.lock();
            let track = tracks.iter().rev().find( |t| t.uri == uri ).unwrap();
            Arc::clone( track )
        }
    }


    fn wait_until( condition: impl Fn() -> bool ) -> bool {
        let deadline = Instant::now() + Duration::from_secs( 5 );
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep( Duration::from_millis( 2 ) );
        }
        condition()
    }


    fn entries( count: usize ) -> Vec<ResourceEntry> {
        ( 0..count )
            .map( |i| ResourceEntry {
                mime_type: MP3_FORMAT.to_string(),
                uri: format!( "res-{}", i ),
                local_uri: format!( "{:02}.mp3", i ),
                size: 1,
            })
            .collect()
    }


    fn harness_with( count: usize, offline: &[&str], backend: FakeBackend ) -> Harness {
        let backend = Arc::new( backend );
        let recorder = Arc::new( Recorder::default() );
        let connector = FakeConnector {
            offline: offline.iter().map( |s| s.to_string() ).collect(),
        };

        let services = Services {
            resolver: Resolver::new(
                std::env::temp_dir().join( "lectern-player-tests-no-cache" ),
                Arc::new( connector ),
            ),
            backend: backend.clone(),
            bookmarks: recorder.clone(),
            notifier: recorder.clone(),
        };

        Harness {
            player: Player::new( "book-1", "Test Book", entries( count ), services ),
            backend,
            recorder,
        }
    }


    fn harness( count: usize, length: Duration ) -> Harness {
        harness_with( count, &[], FakeBackend { default_length: length, ..Default::default() } )
    }


    #[test]
    fn test_new_filters_playlist() {
        let mut resources = entries( 2 );
        resources.insert( 1, ResourceEntry {
            mime_type: "text/plain".into(),
            uri: "notes".into(),
            local_uri: "notes.txt".into(),
            size: 3,
        });

        let h = harness( 0, SHORT );
        let services = Services {
            resolver: h.player.services.resolver.clone(),
            backend: h.backend.clone(),
            bookmarks: h.recorder.clone(),
            notifier: h.recorder.clone(),
        };
        let player = Player::new( "id", "Name: Part 1?", resources, services );

        assert_eq!( player.len(), 2 );
        assert_eq!( player.playlist()[ 1 ].uri, "res-1" );
        assert_eq!( player.book.dir, "Name_ Part 1_" );
    }


    #[test]
    fn test_set_track_clamps_low_and_ignores_high() {
        let h = harness( 3, SHORT );

        h.player.set_track( 1 );
        assert_eq!( h.player.fragment(), 1 );

        h.player.set_track( 3 );
        assert_eq!( h.player.fragment(), 1 );

        h.player.set_track( 100 );
        assert_eq!( h.player.fragment(), 1 );

        h.player.set_track( -5 );
        assert_eq!( h.player.fragment(), 0 );

        h.player.change_track( 2 );
        assert_eq!( h.player.fragment(), 2 );

        h.player.change_track( 1 );
        assert_eq!( h.player.fragment(), 2 );

        h.player.change_track( -10 );
        assert_eq!( h.player.fragment(), 0 );
        assert!( !h.player.is_playing() );
    }


    #[test]
    fn test_stop_when_idle_writes_default_bookmark() {
        let h = harness( 3, SHORT );
        h.player.stop();

        assert!( !h.player.is_playing() );
        assert_eq!( h.recorder.bookmarks(), vec![ Bookmark {
            book_id: "book-1".into(),
            book_name: "Test Book".into(),
            fragment: 0,
            elapsed: Duration::ZERO,
        }]);
    }


    #[test]
    fn test_plays_whole_playlist() {
        let h = harness( 3, SHORT );
        h.player.play();

        assert!( wait_until( || !h.player.is_playing() ) );
        assert_eq!( h.recorder.fragments(), vec![ ( 0, 3 ), ( 1, 3 ), ( 2, 3 ) ] );
        assert_eq!( h.player.fragment(), 2 );

        // Only the barrier at the start of play wrote a bookmark
        let bookmarks = h.recorder.bookmarks();
        assert_eq!( bookmarks.len(), 1 );
        assert_eq!( bookmarks[ 0 ].fragment, 0 );
    }


    #[test]
    fn test_resolve_failure_ends_session() {
        let h = harness_with( 3, &[ "res-1" ], FakeBackend {
            default_length: SHORT,
            ..Default::default()
        });
        h.player.play();

        assert!( wait_until( || !h.player.is_playing() ) );
        assert_eq!( h.recorder.fragments(), vec![ ( 0, 3 ) ] );

        h.player.stop();
        let last = h.recorder.bookmarks().pop().unwrap();
        assert_eq!( last.fragment, 0 );
        assert_eq!( last.elapsed, SHORT );
    }


    #[test]
    fn test_track_failure_skips_resource() {
        let h = harness_with( 3, &[], FakeBackend {
            default_length: SHORT,
            broken: vec![ "res-1".into() ],
            ..Default::default()
        });
        h.player.play();

        assert!( wait_until( || !h.player.is_playing() ) );
        assert_eq!( h.recorder.fragments(), vec![ ( 0, 3 ), ( 2, 3 ) ] );
    }


    #[test]
    fn test_failed_start_seek_skips_resource() {
        let h = harness_with( 3, &[], FakeBackend {
            default_length: SHORT,
            max_seek: Some( Duration::from_secs( 10 ) ),
            ..Default::default()
        });
        h.player.rewind( Duration::from_secs( 20 ) );
        h.player.play();

        assert!( wait_until( || !h.player.is_playing() ) );
        assert_eq!( h.recorder.fragments(), vec![ ( 1, 3 ), ( 2, 3 ) ] );
        // The pending offset is consumed by the first track only
        assert_eq!( *h.track( 1 ).rewinds.lock(), vec![ Duration::ZERO ] );
    }


    #[test]
    fn test_repeated_play_keeps_one_worker() {
        let h = harness( 3, LONG );
        for _ in 0..5 {
            h.player.play();
        }
        h.wait_for_fragment( 0 );
        h.player.play();
        h.wait_for_fragment( 0 );

        assert!( h.player.is_playing() );
        assert_eq!( h.backend.max_active.load( Ordering::SeqCst ), 1 );

        h.player.stop();
        assert!( !h.player.is_playing() );
        assert_eq!( h.backend.active.load( Ordering::SeqCst ), 0 );
    }


    #[test]
    fn test_stop_records_track_position() {
        let h = harness( 3, LONG );
        h.player.rewind( Duration::from_secs( 30 ) );
        h.player.play();
        let track = h.wait_for_fragment( 0 );
        assert_eq!( *track.rewinds.lock(), vec![ Duration::from_secs( 30 ) ] );

        h.player.stop();
        assert!( track.stopped.load( Ordering::SeqCst ) );
        assert_eq!( h.backend.active.load( Ordering::SeqCst ), 0 );

        let last = h.recorder.bookmarks().pop().unwrap();
        assert_eq!( last.fragment, 0 );
        assert_eq!( last.elapsed, Duration::from_secs( 30 ) );

        // The pending offset was used up by the first session
        h.player.play();
        assert!( wait_until( || h.recorder.fragments().len() == 2 ) );
        assert_eq!( *h.track( 1 ).rewinds.lock(), vec![ Duration::ZERO ] );
    }


    #[test]
    fn test_moving_while_stopped_forgets_old_position() {
        let h = harness( 3, LONG );
        h.player.rewind( Duration::from_secs( 30 ) );
        h.player.play();
        h.wait_for_fragment( 0 );
        h.player.stop();
        assert_eq!( h.player.elapsed(), Duration::from_secs( 30 ) );

        h.player.set_track( 2 );
        assert_eq!( h.player.elapsed(), Duration::ZERO );
        h.player.stop();

        let last = h.recorder.bookmarks().pop().unwrap();
        assert_eq!( ( last.fragment, last.elapsed ), ( 2, Duration::ZERO ) );

        // Staying on the same fragment keeps the position
        h.player.rewind( Duration::from_secs( 12 ) );
        h.player.set_track( 2 );
        h.player.change_track( 5 );
        assert_eq!( h.player.elapsed(), Duration::from_secs( 12 ) );
    }


    #[test]
    fn test_volume_clamps_each_channel() {
        let h = harness( 1, LONG );
        h.player.change_volume( 1 );

        h.player.play();
        let track = h.wait_for_fragment( 0 );

        track.set_volume( 60000, 60000 );
        h.player.change_volume( 2 );
        assert_eq!( track.volume(), ( 65535, 65535 ) );

        track.set_volume( 60000, 60000 );
        h.player.change_volume( -20 );
        assert_eq!( track.volume(), ( 0, 0 ) );

        track.set_volume( 60000, 1000 );
        h.player.change_volume( 1 );
        assert_eq!( track.volume(), ( 64096, 5096 ) );

        h.player.change_volume( -1 );
        assert_eq!( track.volume(), ( 60000, 1000 ) );
    }


    #[test]
    fn test_speed_reaches_active_and_next_track() {
        let h = harness( 2, LONG );
        h.player.set_speed( 1.5 );
        h.player.play();
        let track = h.wait_for_fragment( 0 );
        assert_eq!( *track.speed.lock(), 1.5 );

        h.player.change_speed( 0.5 );
        assert_eq!( *track.speed.lock(), 2.0 );

        h.player.set_track( 1 );
        h.wait_for_fragment( 1 );
        assert_eq!( *h.backend.speeds.lock(), vec![ 1.5, 2.0 ] );
    }


    #[test]
    fn test_play_pause_toggles_active_track() {
        let h = harness( 1, LONG );
        h.player.play_pause();
        assert!( h.player.is_playing() );
        let track = h.wait_for_fragment( 0 );

        h.player.play_pause();
        assert!( track.paused.load( Ordering::SeqCst ) );
        assert!( h.player.is_paused() );

        h.player.play_pause();
        assert!( !track.paused.load( Ordering::SeqCst ) );
        assert!( !h.player.is_paused() );
    }


    #[test]
    fn test_set_track_while_playing_restarts_there() {
        let h = harness( 3, LONG );
        h.player.play();
        let first = h.wait_for_fragment( 0 );

        h.player.set_track( 2 );
        h.wait_for_fragment( 2 );

        assert!( first.stopped.load( Ordering::SeqCst ) );
        assert_eq!( h.player.fragment(), 2 );
        assert_eq!( h.backend.max_active.load( Ordering::SeqCst ), 1 );
        // Restarting stops the old session, which records its position
        let last = h.recorder.bookmarks().pop().unwrap();
        assert_eq!( last.fragment, 0 );
    }


    #[test]
    fn test_rewind_while_playing_seeks_track() {
        let h = harness_with( 1, &[], FakeBackend {
            default_length: LONG,
            max_seek: Some( Duration::from_secs( 60 ) ),
            ..Default::default()
        });
        h.player.play();
        let track = h.wait_for_fragment( 0 );

        h.player.rewind( Duration::from_secs( 42 ) );
        assert_eq!( h.player.elapsed(), Duration::from_secs( 42 ) );

        // A failed seek leaves playback where it was
        h.player.rewind( Duration::from_secs( 90 ) );
        assert_eq!( h.player.elapsed(), Duration::from_secs( 42 ) );
        assert!( h.player.is_playing() );
        assert_eq!( track.rewinds.lock().len(), 3 );
    }


    #[test]
    fn test_empty_playlist_never_plays() {
        let h = harness( 0, SHORT );
        h.player.play();
        h.player.play_pause();
        assert!( !h.player.is_playing() );
        assert!( h.backend.tracks.lock().is_empty() );
    }


    proptest! {
        #[test]
        fn prop_set_speed_is_clamped( speed in -10.0f64..10.0 ) {
            let h = harness( 1, SHORT );
            h.player.set_speed( speed );
            prop_assert_eq!( h.player.speed(), speed.clamp( MIN_SPEED, MAX_SPEED ) );
        }


        #[test]
        fn prop_change_speed_matches_set_speed( start in 0.0f64..4.0, delta in -4.0f64..4.0 ) {
            let h = harness( 1, SHORT );
            h.player.set_speed( start );
            let expected = ( h.player.speed() + delta ).clamp( MIN_SPEED, MAX_SPEED );
            h.player.change_speed( delta );
            prop_assert_eq!( h.player.speed(), expected );
        }


        #[test]
        fn prop_negative_fragments_clamp_to_zero( start in 0isize..5, fragment in isize::MIN..0 ) {
            let h = harness( 5, SHORT );
            h.player.set_track( start );
            h.player.set_track( fragment );
            prop_assert_eq!( h.player.fragment(), 0 );
        }


        #[test]
        fn prop_fragments_past_end_are_ignored( start in 0isize..5, fragment in 5isize..1000 ) {
            let h = harness( 5, SHORT );
            h.player.set_track( start );
            h.player.set_track( fragment );
            prop_assert_eq!( h.player.fragment(), start as usize );
        }
    }
}
