//! Network streams over HTTP
//!
//! Opens remote resources as plain byte streams. A stream whose body breaks
//! off mid-transfer is resumed with a range request from the last byte read,
//! so a flaky connection does not end playback of a long fragment.

use std::io::{ self, Read };
use std::time::Duration;

use thiserror::Error;


/// A readable byte stream that can be handed to another thread.
pub type MediaStream = Box<dyn Read + Send + Sync>;


/// Errors that can occur when opening a network stream.
#[derive( Debug, Error )]
pub enum ConnectError {
    #[error( "Request to {uri} failed: {message}" )]
    Request { uri: String, message: String },

    #[error( "Server answered {status} for {uri}" )]
    Status { uri: String, status: u16 },

    #[error( "Server answered {status} instead of 206 Partial Content" )]
    RangeNotSupported { status: u16 },

    #[error( "Content-Range {got:?} does not start at byte {expected}" )]
    RangeMismatch { expected: u64, got: Option<String> },
}


/// Opens remote resources.
pub trait Connector: Send + Sync {
    fn open( &self, uri: &str ) -> Result<MediaStream, ConnectError>;
}


/// HTTP client settings.
#[derive( Debug, Clone )]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// How many times a broken body may be resumed without progress in between.
    pub reconnect_attempts: u32,
}


impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs( 30 ),
            read_timeout: Duration::from_secs( 60 ),
            reconnect_attempts: 3,
        }
    }
}


/// `Connector` backed by a shared ureq agent.
pub struct HttpConnector {
    agent: ureq::Agent,
    reconnect_attempts: u32,
}


impl HttpConnector {
    pub fn new( config: HttpConfig ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect( config.connect_timeout )
            .timeout_read( config.read_timeout )
            .user_agent( concat!( "lectern/", env!( "CARGO_PKG_VERSION" ) ) )
            .redirects( 10 )
            .build();

        Self {
            agent,
            reconnect_attempts: config.reconnect_attempts,
        }
    }
}


impl Default for HttpConnector {
    fn default() -> Self {
        Self::new( HttpConfig::default() )
    }
}


impl Connector for HttpConnector {
    fn open( &self, uri: &str ) -> Result<MediaStream, ConnectError> {
        let response = call( self.agent.get( uri ), uri )?;

        let content_length = response
            .header( "Content-Length" )
            .and_then( |s| s.parse::<u64>().ok() );

        tracing::debug!( "Opened {} ({:?} bytes)", uri, content_length );

        Ok( Box::new( HttpStream {
            agent: self.agent.clone(),
            uri: uri.to_string(),
            reader: response.into_reader(),
            position: 0,
            content_length,
            max_reconnects: self.reconnect_attempts,
            reconnects_left: self.reconnect_attempts,
        }))
    }
}


fn call( request: ureq::Request, uri: &str ) -> Result<ureq::Response, ConnectError> {
    match request.call() {
        Ok( response ) => Ok( response ),
        Err( ureq::Error::Status( status, _ ) ) => Err( ConnectError::Status {
            uri: uri.to_string(),
            status,
        }),
        Err( e ) => Err( ConnectError::Request {
            uri: uri.to_string(),
            message: e.to_string(),
        }),
    }
}


/// Response body that resumes itself after a broken transfer.
struct HttpStream {
    agent: ureq::Agent,
    uri: String,
    reader: MediaStream,
    position: u64,
    content_length: Option<u64>,
    max_reconnects: u32,
    reconnects_left: u32,
}


impl HttpStream {
    /// Reissues the request starting at the current position.
    fn resume( &self ) -> Result<MediaStream, ConnectError> {
        let request = self.agent
            .get( &self.uri )
            .set( "Range", &format!( "bytes={}-", self.position ) );
        let response = call( request, &self.uri )?;

        let status = response.status();
        if status != 206 {
            return Err( ConnectError::RangeNotSupported { status } );
        }

        let content_range = response.header( "Content-Range" ).map( str::to_string );
        let expected_prefix = format!( "bytes {}-", self.position );
        match content_range {
            Some( ref range ) if range.starts_with( &expected_prefix ) => {}
            got => return Err( ConnectError::RangeMismatch { expected: self.position, got } ),
        }

        Ok( response.into_reader() )
    }


    fn is_truncated( &self ) -> bool {
        self.content_length.is_some_and( |len| self.position < len )
    }
}


impl Read for HttpStream {
    fn read( &mut self, buf: &mut [u8] ) -> io::Result<usize> {
        loop {
            let error = match self.reader.read( buf ) {
                Ok( 0 ) if !buf.is_empty() && self.is_truncated() => {
                    io::Error::new( io::ErrorKind::UnexpectedEof, "connection closed early" )
                }
                Ok( n ) => {
                    if n > 0 {
                        self.position += n as u64;
                        self.reconnects_left = self.max_reconnects;
                    }
                    return Ok( n );
                }
                Err( e ) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err( e ) => e,
            };

            if self.reconnects_left == 0 {
                return Err( error );
            }
            self.reconnects_left -= 1;

            tracing::warn!(
                "Stream {} broke at byte {}: {}; resuming",
                self.uri,
                self.position,
                error
            );

            match self.resume() {
                Ok( reader ) => self.reader = reader,
                Err( e ) => {
                    tracing::warn!( "Resume failed: {}", e );
                    return Err( error );
                }
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Cursor, Write };
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    use parking_lot::Mutex;


    fn stream( data: &[u8], content_length: Option<u64> ) -> HttpStream {
        HttpStream {
            agent: ureq::AgentBuilder::new().build(),
            uri: "http://127.0.0.1:9/book/1.mp3".to_string(),
            reader: Box::new( Cursor::new( data.to_vec() ) ),
            position: 0,
            content_length,
            max_reconnects: 0,
            reconnects_left: 0,
        }
    }


    #[test]
    fn test_complete_body_reads_to_eof() {
        let mut s = stream( b"0123456789", Some( 10 ) );
        let mut out = Vec::new();
        s.read_to_end( &mut out ).unwrap();
        assert_eq!( out, b"0123456789" );
        assert_eq!( s.position, 10 );
    }


    #[test]
    fn test_truncated_body_is_an_error() {
        let mut s = stream( b"01234", Some( 10 ) );
        let mut out = Vec::new();
        let err = s.read_to_end( &mut out ).unwrap_err();
        assert_eq!( err.kind(), io::ErrorKind::UnexpectedEof );
        assert_eq!( out, b"01234" );
    }


    #[test]
    fn test_unknown_length_ends_at_eof() {
        let mut s = stream( b"abc", None );
        let mut out = Vec::new();
        s.read_to_end( &mut out ).unwrap();
        assert_eq!( out, b"abc" );
    }


    /// Answers one connection per canned response and records each request head.
    fn serve( responses: Vec<String> ) -> ( String, Arc<Mutex<Vec<String>>> ) {
        let listener = TcpListener::bind( "127.0.0.1:0" ).unwrap();
        let url = format!( "http://{}/book/1.mp3", listener.local_addr().unwrap() );
        let requests = Arc::new( Mutex::new( Vec::new() ) );
        let seen = Arc::clone( &requests );

        thread::spawn( move || {
            for response in responses {
                let Ok(( mut conn, _ )) = listener.accept() else {
                    return;
                };
                let mut head = Vec::new();
                let mut byte = [ 0u8; 1 ];
                while !head.ends_with( b"\r\n\r\n" ) {
                    match conn.read( &mut byte ) {
                        Ok( 1 ) => head.push( byte[ 0 ] ),
                        _ => break,
                    }
                }
                seen.lock().push( String::from_utf8_lossy( &head ).to_lowercase() );
                let _ = conn.write_all( response.as_bytes() );
            }
        });

        ( url, requests )
    }


    /// Builds a response that declares `declared` body bytes but may send fewer.
    fn response( status: &str, content_range: Option<&str>, declared: usize, body: &str ) -> String {
        let mut out = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            status,
            declared
        );
        if let Some( range ) = content_range {
            out.push_str( &format!( "Content-Range: {}\r\n", range ) );
        }
        out.push_str( "\r\n" );
        out.push_str( body );
        out
    }


    fn connector( reconnect_attempts: u32 ) -> HttpConnector {
        HttpConnector::new( HttpConfig {
            reconnect_attempts,
            ..HttpConfig::default()
        })
    }


    #[test]
    fn test_broken_body_resumes_with_range() {
        let ( url, requests ) = serve( vec![
            response( "200 OK", None, 10, "01234" ),
            response( "206 Partial Content", Some( "bytes 5-9/10" ), 5, "56789" ),
        ]);

        let mut body = Vec::new();
        connector( 2 ).open( &url ).unwrap().read_to_end( &mut body ).unwrap();
        assert_eq!( body, b"0123456789" );

        let requests = requests.lock();
        assert_eq!( requests.len(), 2 );
        assert!( !requests[ 0 ].contains( "range:" ) );
        assert!( requests[ 1 ].contains( "range: bytes=5-" ), "{}", requests[ 1 ] );
    }


    #[test]
    fn test_progress_restores_reconnect_budget() {
        let ( url, requests ) = serve( vec![
            response( "200 OK", None, 10, "012" ),
            response( "206 Partial Content", Some( "bytes 3-9/10" ), 7, "3456" ),
            response( "206 Partial Content", Some( "bytes 7-9/10" ), 3, "789" ),
        ]);

        let mut body = Vec::new();
        connector( 1 ).open( &url ).unwrap().read_to_end( &mut body ).unwrap();
        assert_eq!( body, b"0123456789" );

        let requests = requests.lock();
        assert_eq!( requests.len(), 3 );
        assert!( requests[ 2 ].contains( "range: bytes=7-" ) );
    }


    #[test]
    fn test_resume_requires_partial_content() {
        let ( url, requests ) = serve( vec![
            response( "200 OK", None, 10, "01234" ),
            response( "200 OK", None, 10, "0123456789" ),
        ]);

        let mut body = Vec::new();
        let err = connector( 3 ).open( &url ).unwrap().read_to_end( &mut body ).unwrap_err();
        assert_eq!( err.kind(), io::ErrorKind::UnexpectedEof );
        assert_eq!( body, b"01234" );
        assert_eq!( requests.lock().len(), 2 );
    }


    #[test]
    fn test_resume_rejects_wrong_content_range() {
        let ( url, requests ) = serve( vec![
            response( "200 OK", None, 10, "01234" ),
            response( "206 Partial Content", Some( "bytes 0-9/10" ), 10, "0123456789" ),
        ]);

        let mut body = Vec::new();
        let err = connector( 3 ).open( &url ).unwrap().read_to_end( &mut body ).unwrap_err();
        assert_eq!( err.kind(), io::ErrorKind::UnexpectedEof );
        assert_eq!( body, b"01234" );
        assert_eq!( requests.lock().len(), 2 );
    }


    #[test]
    fn test_open_reports_status() {
        let ( url, _ ) = serve( vec![ response( "404 Not Found", None, 0, "" ) ] );
        match connector( 0 ).open( &url ) {
            Err( ConnectError::Status { status, .. } ) => assert_eq!( status, 404 ),
            Err( e ) => panic!( "unexpected error: {}", e ),
            Ok( _ ) => panic!( "expected a status error" ),
        }
    }
}
