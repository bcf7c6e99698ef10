//! Tracks: one playing resource
//!
//! A track owns the decoder, the output device and the speed resampler for a
//! single resource. `Track::play` blocks the calling thread until the stream
//! ends or `Track::stop` is called from another thread; every other method
//! may be called concurrently while `play` runs.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rubato::{ FastFixedOut, PolynomialDegree, Resampler };
use thiserror::Error;

use crate::connect::MediaStream;
use crate::decoder::{ Decoder, DecoderError };
use crate::output::{ AudioOutput, OutputError, SampleBuffer };


/// Resampling ratios may move this far from the 1x ratio in either direction.
const MAX_RELATIVE_RATIO: f64 = 4.0;

/// Output frames produced per resampler call.
const RESAMPLER_CHUNK: usize = 1024;


/// Errors that can occur while creating or seeking a track.
#[derive( Debug, Error )]
pub enum TrackError {
    #[error( "Decoder error: {0}" )]
    Decoder( #[from] DecoderError ),

    #[error( "Audio output error: {0}" )]
    Output( #[from] OutputError ),

    #[error( "Failed to create resampler: {0}" )]
    Resampler( String ),
}


/// A live, decodable resource attached to an output device.
pub trait Track: Send + Sync {
    /// Plays until the stream ends or `stop` is observed.
    fn play( &self );

    fn pause( &self, paused: bool );

    /// Asks a running `play` to return as soon as possible.
    fn stop( &self );

    fn set_speed( &self, speed: f64 );

    /// Moves playback to an absolute position.
    fn rewind( &self, position: Duration ) -> Result<(), TrackError>;

    /// Position within the resource, independent of playback speed.
    fn elapsed( &self ) -> Duration;

    /// Left and right output gain, full scale is 65535.
    fn volume( &self ) -> ( u16, u16 );

    fn set_volume( &self, left: u16, right: u16 );
}


/// Creates tracks from resolved streams.
pub trait TrackBackend: Send + Sync {
    fn open( &self, stream: MediaStream, speed: f64 ) -> Result<Arc<dyn Track>, TrackError>;
}


/// Backend that decodes with Symphonia and plays through cpal.
#[derive( Debug, Default, Clone, Copy )]
pub struct AudioBackend;


impl TrackBackend for AudioBackend {
    fn open( &self, stream: MediaStream, speed: f64 ) -> Result<Arc<dyn Track>, TrackError> {
        Ok( Arc::new( AudioTrack::new( stream, speed )? ) )
    }
}


/// Converts planar samples back to interleaved format.
/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    if channels.is_empty() || channels[ 0 ].is_empty() {
        return Vec::new();
    }
    let frames = channels[ 0 ].len();
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


/// Resampler that converts to the device rate and applies playback speed.
struct SpeedResampler {
    resampler: FastFixedOut<f32>,
    /// Device rate over source rate
    base_ratio: f64,
    speed: f64,
    /// Planar input waiting for a full resampler chunk
    pending: Vec<Vec<f32>>,
}


impl SpeedResampler {
    fn new( source_rate: u32, output_rate: u32, channels: usize ) -> Result<Self, TrackError> {
        let base_ratio = output_rate as f64 / source_rate as f64;
        let resampler = FastFixedOut::<f32>::new(
            base_ratio,
            MAX_RELATIVE_RATIO,
            PolynomialDegree::Cubic,
            RESAMPLER_CHUNK,
            channels,
        ).map_err( |e| TrackError::Resampler( e.to_string() ) )?;

        Ok( Self {
            resampler,
            base_ratio,
            speed: 1.0,
            pending: vec![ Vec::new(); channels ],
        })
    }


    fn set_speed( &mut self, speed: f64 ) {
        if ( speed - self.speed ).abs() < f64::EPSILON {
            return;
        }
        if let Err( e ) = self.resampler.set_resample_ratio( self.base_ratio / speed, true ) {
            tracing::warn!( "Cannot play at {}x: {}", speed, e );
        }
        self.speed = speed;
    }


    /// Feeds interleaved samples and returns whatever complete chunks came out.
    fn process( &mut self, samples: &[f32] ) -> Vec<f32> {
        let channels = self.pending.len();
        for frame in samples.chunks_exact( channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                self.pending[ ch ].push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.resampler.input_frames_next() {
            let needed = self.resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending
                .iter_mut()
                .map( |ch| ch.drain( ..needed ).collect() )
                .collect();

            match self.resampler.process( &chunk, None ) {
                Ok( resampled ) => out.extend( interleave( &resampled ) ),
                Err( e ) => {
                    tracing::error!( "Resample error: {}", e );
                    break;
                }
            }
        }
        out
    }


    /// Resamples the leftover input at end of stream.
    fn flush( &mut self ) -> Vec<f32> {
        if self.pending[ 0 ].is_empty() {
            return Vec::new();
        }
        let result = self.resampler.process_partial( Some( self.pending.as_slice() ), None );
        self.clear();
        match result {
            Ok( resampled ) => interleave( &resampled ),
            Err( e ) => {
                tracing::error!( "Final resample error: {}", e );
                Vec::new()
            }
        }
    }


    fn clear( &mut self ) {
        for ch in &mut self.pending {
            ch.clear();
        }
        self.resampler.reset();
    }
}


/// Decoder and resampler, locked together so seeks never race a decode.
struct Pipeline {
    decoder: Decoder,
    resampler: SpeedResampler,
}


/// Outcome of one decode step.
enum Step {
    Samples( Vec<f32> ),
    End( Vec<f32> ),
    Failed( DecoderError ),
}


/// Wrapper that lets the cpal stream live inside a shared track.
///
/// SAFETY: the stream is created and started on the playback worker thread. It
/// is dropped by whichever thread releases the last track reference; the desktop
/// hosts shut their streams down by signalling and joining their own audio
/// thread, which is valid from any thread. cpal's callback thread only touches
/// the shared SampleBuffer.
struct OutputHandle( AudioOutput );

unsafe impl Send for OutputHandle {}
unsafe impl Sync for OutputHandle {}


/// Track that decodes MP3 and plays it on the default output device.
pub struct AudioTrack {
    pipeline: Mutex<Pipeline>,
    buffer: Arc<SampleBuffer>,
    output: OutputHandle,
    channels: usize,
    source_rate: u32,
    output_rate: u32,
    /// Playback speed stored as f64 bits
    speed: AtomicU64,
    stop_flag: AtomicBool,
    /// Source frames decoded so far
    frames_decoded: AtomicU64,
}


impl AudioTrack {
    /// Probes `stream` and opens the output device.
    pub fn new( stream: MediaStream, speed: f64 ) -> Result<Self, TrackError> {
        let decoder = Decoder::open( stream )?;
        let source_rate = decoder.sample_rate();
        let channels = decoder.channels();

        let ( output, buffer ) = AudioOutput::new( source_rate, channels as u16 )?;
        let output_rate = output.sample_rate();

        let mut resampler = SpeedResampler::new( source_rate, output_rate, channels )?;
        resampler.set_speed( speed );

        Ok( Self {
            pipeline: Mutex::new( Pipeline { decoder, resampler } ),
            buffer,
            output: OutputHandle( output ),
            channels,
            source_rate,
            output_rate,
            speed: AtomicU64::new( speed.to_bits() ),
            stop_flag: AtomicBool::new( false ),
            frames_decoded: AtomicU64::new( 0 ),
        })
    }


    fn speed( &self ) -> f64 {
        f64::from_bits( self.speed.load( Ordering::Relaxed ) )
    }


    fn stopped( &self ) -> bool {
        self.stop_flag.load( Ordering::Relaxed )
    }


    fn step( &self ) -> Step {
        let mut pipeline = self.pipeline.lock();
        pipeline.resampler.set_speed( self.speed() );

        match pipeline.decoder.decode_next() {
            Ok( Some( samples ) ) => {
                let frames = samples.len() / self.channels;
                self.frames_decoded.fetch_add( frames as u64, Ordering::Relaxed );
                Step::Samples( pipeline.resampler.process( &samples ) )
            }
            Ok( None ) => Step::End( pipeline.resampler.flush() ),
            Err( e ) => Step::Failed( e ),
        }
    }


    /// Pushes everything into the sample buffer, waiting for room as needed.
    fn push_all( &self, samples: &[f32] ) {
        let mut offset = 0;
        while offset < samples.len() && !self.stopped() {
            let pushed = self.buffer.push( &samples[ offset.. ] );
            offset += pushed;
            if pushed == 0 {
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }
}


impl Track for AudioTrack {
    fn play( &self ) {
        if let Err( e ) = self.output.0.play() {
            tracing::error!( "Failed to start output: {}", e );
            return;
        }

        // Keep about 50ms buffered ahead of the device
        let target_buffer = self.output_rate as usize * self.channels / 20;

        loop {
            if self.stopped() {
                tracing::debug!( "Track: stop signal received" );
                break;
            }

            if self.buffer.is_paused() {
                thread::sleep( Duration::from_millis( 10 ) );
                continue;
            }

            if self.buffer.len() > target_buffer {
                thread::sleep( Duration::from_millis( 5 ) );
                continue;
            }

            match self.step() {
                Step::Samples( samples ) => self.push_all( &samples ),
                Step::End( samples ) => {
                    self.push_all( &samples );
                    tracing::debug!( "Track: reached end of stream" );
                    while !self.buffer.is_empty() && !self.stopped() {
                        thread::sleep( Duration::from_millis( 10 ) );
                    }
                    break;
                }
                Step::Failed( e ) => {
                    tracing::error!( "Decode error: {}", e );
                    break;
                }
            }
        }
    }


    fn pause( &self, paused: bool ) {
        self.buffer.set_paused( paused );
    }


    fn stop( &self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.buffer.clear();
    }


    fn set_speed( &self, speed: f64 ) {
        self.speed.store( speed.to_bits(), Ordering::Relaxed );
    }


    fn rewind( &self, position: Duration ) -> Result<(), TrackError> {
        let mut pipeline = self.pipeline.lock();

        let target = ( position.as_secs_f64() * self.source_rate as f64 ) as u64;
        if target == self.frames_decoded.load( Ordering::Relaxed ) {
            return Ok(());
        }

        let reached = pipeline.decoder.seek( position )?;
        pipeline.resampler.clear();
        self.buffer.clear();

        let frames = ( reached.as_secs_f64() * self.source_rate as f64 ) as u64;
        self.frames_decoded.store( frames, Ordering::Relaxed );
        tracing::debug!( "Track: seeked to {:?}", reached );
        Ok(())
    }


    fn elapsed( &self ) -> Duration {
        let decoded = self.frames_decoded.load( Ordering::Relaxed ) as f64 / self.source_rate as f64;

        // Samples still waiting in the buffer have not been heard yet
        let buffered_frames = self.buffer.len() / self.channels.max( 1 );
        let buffered = buffered_frames as f64 / self.output_rate as f64 * self.speed();

        Duration::from_secs_f64( ( decoded - buffered ).max( 0.0 ) )
    }


    fn volume( &self ) -> ( u16, u16 ) {
        self.buffer.gain()
    }


    fn set_volume( &self, left: u16, right: u16 ) {
        self.buffer.set_gain( left, right );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn frames( resampled: &[f32], channels: usize ) -> usize {
        resampled.len() / channels
    }


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_double_speed_halves_output() {
        let mut resampler = SpeedResampler::new( 44100, 44100, 2 ).unwrap();
        resampler.set_speed( 2.0 );

        let input = vec![ 0.0f32; 20480 * 2 ];
        let mut out = resampler.process( &input );
        out.extend( resampler.flush() );

        let produced = frames( &out, 2 );
        assert!( ( 8192..=11264 ).contains( &produced ), "produced {} frames", produced );
    }


    #[test]
    fn test_normal_speed_keeps_length() {
        let mut resampler = SpeedResampler::new( 44100, 44100, 1 ).unwrap();

        let input = vec![ 0.0f32; 8192 ];
        let out = resampler.process( &input );
        assert!( frames( &out, 1 ) >= 6144 && frames( &out, 1 ) <= 8192 );
        assert!( resampler.pending[ 0 ].len() < resampler.resampler.input_frames_next() );
    }


    #[test]
    fn test_clear_drops_pending_input() {
        let mut resampler = SpeedResampler::new( 22050, 44100, 2 ).unwrap();
        resampler.process( &[ 0.5; 64 ] );
        assert_eq!( resampler.pending[ 1 ].len(), 32 );

        resampler.clear();
        assert!( resampler.pending.iter().all( Vec::is_empty ) );
        assert!( resampler.flush().is_empty() );
    }
}
