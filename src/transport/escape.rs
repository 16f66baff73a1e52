//! URL path escaping for engine commands.
//!
//! Generic URL encoders escape far too much: the engine's command grammar
//! leans on punctuation (`@`, `~`, `;`, `/`, `$`, `!`, `*`, ...) and its HTTP
//! server decodes only `%XX` sequences. Only bytes that would break the
//! request line or be reinterpreted by the server are encoded.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// ASCII bytes that must be percent-encoded in a command path. Non-ASCII
/// bytes are always encoded.
const COMMAND_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode `command` for use after `/cmd/`.
pub fn escape_command(command: &str) -> String {
    utf8_percent_encode(command, COMMAND_PATH).to_string()
}
