//! Format dispatch
//!
//! Every supported format ends up as an MP3 byte stream for the decoder.

use crate::connect::MediaStream;
use crate::lkf::LkfReader;
use crate::resource::MediaFormat;


/// Wraps `source` so that it yields plain MP3 bytes.
pub fn dispatch( format: MediaFormat, source: MediaStream ) -> MediaStream {
    match format {
        MediaFormat::Lkf => Box::new( LkfReader::new( source ) ),
        MediaFormat::Mp3 => source,
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Cursor, Read };

    use crate::lkf::BLOCK_SIZE;


    #[test]
    fn test_mp3_passes_through() {
        let data = vec![ 0xAB; BLOCK_SIZE ];
        let mut stream = dispatch( MediaFormat::Mp3, Box::new( Cursor::new( data.clone() ) ) );
        let mut out = Vec::new();
        stream.read_to_end( &mut out ).unwrap();
        assert_eq!( out, data );
    }


    #[test]
    fn test_lkf_is_deciphered() {
        let data = vec![ 0xAB; BLOCK_SIZE ];
        let mut stream = dispatch( MediaFormat::Lkf, Box::new( Cursor::new( data.clone() ) ) );
        let mut out = Vec::new();
        stream.read_to_end( &mut out ).unwrap();
        assert_eq!( out.len(), BLOCK_SIZE );
        assert_ne!( out, data );
    }
}
