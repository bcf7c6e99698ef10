//! Audio decoding via Symphonia
//!
//! Decodes an MP3 byte stream into interleaved PCM samples. Streams are not
//! seekable, so seeking backwards is only possible while nothing has been
//! consumed past the target.

use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

use crate::connect::MediaStream;


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Audio decoder wrapper around Symphonia.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
}


impl Decoder {
    /// Probes `stream` as MP3 and prepares a decoder for its first audio track.
    pub fn open( stream: MediaStream ) -> Result<Self, DecoderError> {
        // Network streams deliver in bursts, give the reader some room
        let mss_opts = MediaSourceStreamOptions { buffer_len: 256 * 1024 };
        let mss = MediaSourceStream::new( Box::new( ReadOnlySource::new( stream ) ), mss_opts );

        let mut hint = Hint::new();
        hint.with_extension( "mp3" );
        hint.mime_type( "audio/mpeg" );

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecoderError::UnsupportedFormat )?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = codec_params.n_frames.map( |frames| {
            Duration::from_secs_f64( frames as f64 / sample_rate as f64 )
        });

        tracing::info!(
            "Opened audio: {} Hz, {} channels, duration: {:?}",
            sample_rate,
            channels,
            duration
        );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
        })
    }


    /// Returns the sample rate of the audio.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    /// Returns the number of channels.
    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => {
                    return Err( DecoderError::Decode( e.to_string() ) );
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                Err( SymphoniaError::DecodeError( e ) ) => {
                    // Corrupt frame, skip it
                    tracing::debug!( "Skipping packet: {}", e );
                    continue;
                }
                Err( e ) => {
                    return Err( DecoderError::Decode( e.to_string() ) );
                }
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();

            let mut sample_buf = match self.sample_buf.take() {
                Some( buf ) if buf.capacity() >= num_frames => buf,
                _ => SampleBuffer::new( num_frames as u64, spec ),
            };
            sample_buf.copy_interleaved_ref( decoded );
            let samples = sample_buf.samples().to_vec();
            self.sample_buf = Some( sample_buf );

            return Ok( Some( samples ) );
        }
    }


    /// Seeks to `position` and returns the position actually reached.
    pub fn seek( &mut self, position: Duration ) -> Result<Duration, DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position.as_secs_f64() ),
            track_id: Some( self.track_id ),
        };

        let seeked = self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;

        // Reset decoder state after seek
        self.decoder.reset();

        let reached = seeked.actual_ts as f64 / self.sample_rate as f64;
        Ok( Duration::from_secs_f64( reached ) )
    }
}
