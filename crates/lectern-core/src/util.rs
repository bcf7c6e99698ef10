//! Small helpers shared across modules.


/// Characters that are not allowed in file names on common filesystems.
const PROHIBITED_CHARACTERS: &[char] = &[ '\\', '/', ':', '*', '?', '"', '<', '>', '|' ];


/// Maps an arbitrary book name to a filesystem-safe directory name.
///
/// The mapping is deterministic and must match the layout the download
/// side uses when it caches a book.
pub fn sanitize_file_name( name: &str ) -> String {
    let replaced: String = name
        .chars()
        .map( |c| if PROHIBITED_CHARACTERS.contains( &c ) || c.is_control() { '_' } else { c } )
        .collect();

    // Windows rejects names ending in a dot or space
    let trimmed = replaced.trim_end_matches( |c: char| c == '.' || c == ' ' );
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_sanitize_replaces_prohibited() {
        assert_eq!( sanitize_file_name( "War: and/or Peace?" ), "War_ and_or Peace_" );
        assert_eq!( sanitize_file_name( "a\tb" ), "a_b" );
    }


    #[test]
    fn test_sanitize_trailing_and_empty() {
        assert_eq!( sanitize_file_name( "Vol. 1..." ), "Vol. 1" );
        assert_eq!( sanitize_file_name( " . " ), "_" );
        assert_eq!( sanitize_file_name( "" ), "_" );
    }


    #[test]
    fn test_sanitize_keeps_unicode() {
        assert_eq!( sanitize_file_name( "Война и мир" ), "Война и мир" );
    }
}
