//! Audio output via cpal
//!
//! Handles sending decoded PCM samples to the system audio device.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use parking_lot::Mutex;
use thiserror::Error;


/// Full-scale channel gain.
pub const MAX_GAIN: u16 = u16::MAX;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


fn pack_gain( left: u16, right: u16 ) -> u32 {
    ( left as u32 ) << 16 | right as u32
}


fn unpack_gain( packed: u32 ) -> ( u16, u16 ) {
    ( ( packed >> 16 ) as u16, packed as u16 )
}


/// Shared sample buffer between producer (decoder) and consumer (audio callback).
/// Handles channel conversion between source and output.
pub struct SampleBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    /// Left gain in the high half, right gain in the low half
    gain: AtomicU32,
    source_channels: u16,
    output_channels: u16,
}


impl SampleBuffer {
    /// Creates a new sample buffer with the given capacity and channel configuration.
    ///
    /// - `capacity`: Maximum number of samples to buffer
    /// - `source_channels`: Number of channels pushed by the producer
    /// - `output_channels`: Number of channels expected by the output device
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            gain: AtomicU32::new( pack_gain( MAX_GAIN, MAX_GAIN ) ),
            source_channels: source_channels.max( 1 ),
            output_channels: output_channels.max( 1 ),
        }
    }


    /// Pushes samples to the buffer. Returns number of samples actually pushed.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.buffer.lock();
        let available = self.capacity.saturating_sub( buf.len() );
        let to_push = samples.len().min( available );
        buf.extend( samples[ ..to_push ].iter().copied() );
        to_push
    }


    /// Pops samples into the output slice, converting channels and applying gain.
    /// Returns the number of output samples actually written; the rest is silence.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        if self.paused.load( Ordering::Relaxed ) {
            output.fill( 0.0 );
            return 0;
        }

        let ( left, right ) = self.gain();
        let left = left as f32 / MAX_GAIN as f32;
        let right = right as f32 / MAX_GAIN as f32;

        let src_ch = self.source_channels as usize;
        let out_ch = self.output_channels as usize;
        let mut buf = self.buffer.lock();

        let frames = ( output.len() / out_ch ).min( buf.len() / src_ch );
        let mut frame = [ 0.0f32; 8 ];

        for i in 0..frames {
            for ( slot, sample ) in frame.iter_mut().zip( buf.drain( ..src_ch ) ) {
                *slot = sample;
            }
            let frame = &frame[ ..src_ch.min( 8 ) ];
            let out = &mut output[ i * out_ch..( i + 1 ) * out_ch ];

            if out_ch == 1 {
                // Mix down
                let sum: f32 = frame.iter().sum();
                out[ 0 ] = sum / frame.len() as f32 * ( left + right ) * 0.5;
            } else {
                for ( ch, sample ) in out.iter_mut().enumerate() {
                    // Duplicate the last source channel into extra outputs
                    let value = frame[ ch.min( frame.len() - 1 ) ];
                    let gain = if ch % 2 == 0 { left } else { right };
                    *sample = value * gain;
                }
            }
        }

        let written = frames * out_ch;
        output[ written.. ].fill( 0.0 );
        written
    }


    /// Returns the number of samples currently in the buffer.
    pub fn len( &self ) -> usize {
        self.buffer.lock().len()
    }


    /// Returns true if the buffer is empty.
    pub fn is_empty( &self ) -> bool {
        self.buffer.lock().is_empty()
    }


    /// Clears the buffer.
    pub fn clear( &self ) {
        self.buffer.lock().clear();
    }


    /// Sets paused state.
    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    /// Gets paused state.
    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    /// Sets left and right gain (0 = mute, 65535 = full scale).
    pub fn set_gain( &self, left: u16, right: u16 ) {
        self.gain.store( pack_gain( left, right ), Ordering::Relaxed );
    }


    /// Gets left and right gain.
    pub fn gain( &self ) -> ( u16, u16 ) {
        unpack_gain( self.gain.load( Ordering::Relaxed ) )
    }
}


/// Audio output handler.
/// Note: This struct is NOT Send/Sync due to cpal::Stream.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}


impl AudioOutput {
    /// Creates a new audio output for the given source sample rate and channels.
    ///
    /// Returns both the AudioOutput and a shared SampleBuffer that the caller should
    /// use to push samples at the device rate returned by `sample_rate()`.
    pub fn new(
        source_sample_rate: u32,
        source_channels: u16,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported_configs: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate
                && c.max_sample_rate().0 >= source_sample_rate
        };

        // Exact match first, then any channel count at our rate, then the device default
        let config = if let Some( supported ) = supported_configs.iter()
            .find( |c| c.channels() == source_channels && supports_rate( c ) )
        {
            supported.clone().with_sample_rate( cpal::SampleRate( source_sample_rate ) ).config()
        } else if let Some( supported ) = supported_configs.iter().find( |c| supports_rate( c ) ) {
            tracing::info!(
                "Channel conversion: source has {} channels, device using {}",
                source_channels,
                supported.channels()
            );
            supported.clone().with_sample_rate( cpal::SampleRate( source_sample_rate ) ).config()
        } else {
            let default_config = device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?;
            tracing::info!(
                "Device does not support {} Hz, resampling to {} Hz",
                source_sample_rate,
                default_config.sample_rate().0
            );
            default_config.config()
        };

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        // ~500ms of audio at the device rate
        let buffer_capacity = ( config.sample_rate.0 as usize ) * ( source_channels as usize ) / 2;
        let sample_buffer = Arc::new( SampleBuffer::new(
            buffer_capacity,
            source_channels,
            config.channels,
        ));
        let sample_buffer_clone = Arc::clone( &sample_buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    sample_buffer_clone.pop( data );
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok((
            Self {
                stream,
                sample_rate: config.sample_rate.0,
                channels: config.channels,
            },
            sample_buffer,
        ))
    }


    /// Starts audio output.
    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Gets the actual sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    /// Gets the actual number of channels.
    pub fn channels( &self ) -> u16 {
        self.channels
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_gain_round_trip() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        assert_eq!( buffer.gain(), ( MAX_GAIN, MAX_GAIN ) );
        buffer.set_gain( 60000, 123 );
        assert_eq!( buffer.gain(), ( 60000, 123 ) );
    }


    #[test]
    fn test_push_respects_capacity() {
        let buffer = SampleBuffer::new( 4, 2, 2 );
        assert_eq!( buffer.push( &[ 0.1; 6 ] ), 4 );
        assert_eq!( buffer.len(), 4 );
    }


    #[test]
    fn test_pop_applies_per_channel_gain() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        buffer.push( &[ 1.0, 1.0, 0.5, 0.5 ] );
        buffer.set_gain( MAX_GAIN, 0 );

        let mut out = [ 9.0f32; 6 ];
        assert_eq!( buffer.pop( &mut out ), 4 );
        assert_eq!( out, [ 1.0, 0.0, 0.5, 0.0, 0.0, 0.0 ] );
        assert!( buffer.is_empty() );
    }


    #[test]
    fn test_pop_mono_to_stereo() {
        let buffer = SampleBuffer::new( 16, 1, 2 );
        buffer.push( &[ 0.25, 0.5 ] );

        let mut out = [ 0.0f32; 4 ];
        assert_eq!( buffer.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.25, 0.25, 0.5, 0.5 ] );
    }


    #[test]
    fn test_pop_while_paused_is_silent() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        buffer.push( &[ 1.0, 1.0 ] );
        buffer.set_paused( true );

        let mut out = [ 9.0f32; 2 ];
        assert_eq!( buffer.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0, 0.0 ] );
        assert_eq!( buffer.len(), 2 );
    }
}
