//! LKF container support
//!
//! LKF is MP3 data split into 512-byte blocks, each enciphered with XXTEA
//! under a fixed key. A trailing block shorter than 512 bytes is stored in
//! the clear. `LkfReader` undoes the cipher and yields the plain MP3 stream.

use std::io::{ self, Read };


/// Size of one enciphered block in bytes.
pub const BLOCK_SIZE: usize = 512;

const WORDS: usize = BLOCK_SIZE / 4;
const DELTA: u32 = 0x9e37_79b9;
const KEY: [u32; 4] = [ 0x8ac1_4c27, 0x4284_5ac1, 0x1365_06bb, 0x05d4_7c66 ];


#[inline]
fn mx( sum: u32, y: u32, z: u32, p: usize, e: u32 ) -> u32 {
    let k = KEY[ ( p & 3 ) ^ e as usize ];
    ( ( z >> 5 ^ y << 2 ).wrapping_add( y >> 3 ^ z << 4 ) ) ^ ( ( sum ^ y ).wrapping_add( k ^ z ) )
}


fn rounds( n: usize ) -> usize {
    6 + 52 / n
}


/// Deciphers one block of words in place.
fn decipher( v: &mut [u32] ) {
    let n = v.len();
    let rounds = rounds( n );
    let mut sum = ( rounds as u32 ).wrapping_mul( DELTA );
    let mut y = v[ 0 ];

    for _ in 0..rounds {
        let e = ( sum >> 2 ) & 3;
        for p in ( 1..n ).rev() {
            let z = v[ p - 1 ];
            v[ p ] = v[ p ].wrapping_sub( mx( sum, y, z, p, e ) );
            y = v[ p ];
        }
        let z = v[ n - 1 ];
        v[ 0 ] = v[ 0 ].wrapping_sub( mx( sum, y, z, 0, e ) );
        y = v[ 0 ];
        sum = sum.wrapping_sub( DELTA );
    }
}


fn decipher_block( block: &mut [u8; BLOCK_SIZE] ) {
    let mut words = [ 0u32; WORDS ];
    for ( word, bytes ) in words.iter_mut().zip( block.chunks_exact( 4 ) ) {
        *word = u32::from_le_bytes([ bytes[ 0 ], bytes[ 1 ], bytes[ 2 ], bytes[ 3 ] ]);
    }

    decipher( &mut words );

    for ( bytes, word ) in block.chunks_exact_mut( 4 ).zip( words.iter() ) {
        bytes.copy_from_slice( &word.to_le_bytes() );
    }
}


/// Reader that turns an LKF stream into plain MP3 bytes.
pub struct LkfReader<R> {
    inner: R,
    block: [u8; BLOCK_SIZE],
    pos: usize,
    len: usize,
}


impl<R: Read> LkfReader<R> {
    pub fn new( inner: R ) -> Self {
        Self {
            inner,
            block: [ 0; BLOCK_SIZE ],
            pos: 0,
            len: 0,
        }
    }


    /// Reads the next block, deciphering it if it is complete.
    fn fill( &mut self ) -> io::Result<()> {
        let mut len = 0;
        while len < BLOCK_SIZE {
            match self.inner.read( &mut self.block[ len.. ] ) {
                Ok( 0 ) => break,
                Ok( n ) => len += n,
                Err( e ) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err( e ) => return Err( e ),
            }
        }

        if len == BLOCK_SIZE {
            decipher_block( &mut self.block );
        }
        self.pos = 0;
        self.len = len;
        Ok(())
    }
}


impl<R: Read> Read for LkfReader<R> {
    fn read( &mut self, buf: &mut [u8] ) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok( 0 );
        }
        if self.pos == self.len {
            self.fill()?;
            if self.len == 0 {
                return Ok( 0 );
            }
        }

        let n = buf.len().min( self.len - self.pos );
        buf[ ..n ].copy_from_slice( &self.block[ self.pos..self.pos + n ] );
        self.pos += n;
        Ok( n )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn encipher( v: &mut [u32] ) {
        let n = v.len();
        let mut sum = 0u32;
        let mut z = v[ n - 1 ];

        for _ in 0..rounds( n ) {
            sum = sum.wrapping_add( DELTA );
            let e = ( sum >> 2 ) & 3;
            for p in 0..n - 1 {
                let y = v[ p + 1 ];
                v[ p ] = v[ p ].wrapping_add( mx( sum, y, z, p, e ) );
                z = v[ p ];
            }
            let y = v[ 0 ];
            v[ n - 1 ] = v[ n - 1 ].wrapping_add( mx( sum, y, z, n - 1, e ) );
            z = v[ n - 1 ];
        }
    }


    fn encipher_stream( plain: &[u8] ) -> Vec<u8> {
        let mut out = Vec::with_capacity( plain.len() );
        for chunk in plain.chunks( BLOCK_SIZE ) {
            if chunk.len() < BLOCK_SIZE {
                out.extend_from_slice( chunk );
                continue;
            }
            let mut words: Vec<u32> = chunk
                .chunks_exact( 4 )
                .map( |b| u32::from_le_bytes([ b[ 0 ], b[ 1 ], b[ 2 ], b[ 3 ] ]) )
                .collect();
            encipher( &mut words );
            for word in words {
                out.extend_from_slice( &word.to_le_bytes() );
            }
        }
        out
    }


    /// Reader that hands out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }


    impl Read for Trickle {
        fn read( &mut self, buf: &mut [u8] ) -> io::Result<usize> {
            let n = buf.len().min( self.step ).min( self.data.len() - self.pos );
            buf[ ..n ].copy_from_slice( &self.data[ self.pos..self.pos + n ] );
            self.pos += n;
            Ok( n )
        }
    }


    #[test]
    fn test_blocks_are_deciphered_and_tail_passes_through() {
        let plain: Vec<u8> = ( 0..BLOCK_SIZE * 2 + 100 ).map( |i| ( i * 7 % 251 ) as u8 ).collect();
        let enciphered = encipher_stream( &plain );
        assert_ne!( enciphered[ ..BLOCK_SIZE ], plain[ ..BLOCK_SIZE ] );
        assert_eq!( enciphered[ BLOCK_SIZE * 2.. ], plain[ BLOCK_SIZE * 2.. ] );

        let mut reader = LkfReader::new( Trickle { data: enciphered, pos: 0, step: 37 } );
        let mut out = Vec::new();
        reader.read_to_end( &mut out ).unwrap();
        assert_eq!( out, plain );
    }


    #[test]
    fn test_empty_stream() {
        let mut reader = LkfReader::new( io::empty() );
        let mut out = Vec::new();
        assert_eq!( reader.read_to_end( &mut out ).unwrap(), 0 );
    }
}
