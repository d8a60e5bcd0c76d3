//! Stub extractor scripts
//!
//! Each stub is a POSIX shell script run as `/bin/sh <script>`, standing in for
//! yt-dlp. They understand just enough of its command line: `-o <target>`
//! (`-` for stdout, otherwise a template ending in `%(ext)s`) and
//! `--dump-json`.

#![allow(dead_code)]

use std::path::Path;

/// Parses `-o`, substitutes the extension and leaves the result in `$target`.
const PARSE_ARGS: &str = r#"
out=""
dump=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    --dump-json) dump=1; shift ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
target=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
"#;

/// Metadata run: two valid records around one malformed line.
pub fn two_formats_and_garbage() -> String {
    format!(
        "{}{}",
        PARSE_ARGS,
        r#"
[ -n "$dump" ] || exit 2
echo '{"format_id":"18","ext":"mp4","height":360,"vcodec":"avc1","acodec":"mp4a"}'
echo 'this line is not json'
echo '{"format_id":"22","ext":"mp4","width":1280,"height":720,"fps":30,"filesize":1048576}'
"#
    )
}

/// Metadata run that prints one yt-dlp style info dict.
pub fn info_dict() -> String {
    r#"echo '{"id":"abc","title":"clip","formats":[{"format_id":"140","ext":"m4a","resolution":"audio only","acodec":"mp4a.40.2","vcodec":"none"},{"format_id":"137","ext":"mp4","resolution":"1920x1080","vcodec":"avc1","acodec":"none"}]}'
"#
    .to_string()
}

/// Exits 0 without a single usable record.
pub fn no_formats() -> String {
    "echo 'garbage'\necho '{\"title\":\"nothing here\"}'\n".to_string()
}

/// Fails like yt-dlp does for a dead link.
pub fn failing() -> String {
    "echo 'ERROR: [generic] Unable to download webpage: HTTP Error 404: Not Found' >&2\nexit 1\n".to_string()
}

/// Retrieval that succeeds: writes `payload` to the target or stdout.
pub fn serving(payload: &str) -> String {
    format!(
        "{}{}",
        PARSE_ARGS,
        format!(
            r#"
if [ "$out" = "-" ]; then
  printf '%s' '{payload}'
else
  printf '%s' '{payload}' > "$target"
fi
"#,
            payload = payload
        )
    )
}

/// Exits 0 without writing anything.
pub fn silent_success() -> String {
    "exit 0\n".to_string()
}

/// Records that it was launched at all.
pub fn touching(marker: &Path) -> String {
    format!("touch '{}'\nexit 1\n", marker.display())
}

/// Streams forever, recording its pid first.
pub fn endless_stream(pidfile: &Path) -> String {
    format!(
        "echo $$ > '{}'\nwhile :; do printf '0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef'; done\n",
        pidfile.display()
    )
}

/// Writes a partial file, records its pid, then never finishes.
pub fn hanging_download(pidfile: &Path) -> String {
    format!(
        "{}{}",
        PARSE_ARGS,
        format!(
            r#"
printf 'partial' > "$target"
echo $$ > '{}'
while :; do :; done
"#,
            pidfile.display()
        )
    )
}

/// Starts a long-lived helper (as yt-dlp starts ffmpeg), records the helper's
/// pid, then never finishes.
pub fn download_with_helper(helper_pidfile: &Path) -> String {
    format!(
        "{}{}",
        PARSE_ARGS,
        format!(
            r#"
printf 'partial' > "$target"
sh -c 'echo $$ > "$0"; exec sleep 300' '{}' &
while :; do sleep 1; done
"#,
            helper_pidfile.display()
        )
    )
}
