//! Forwarder command line and progress text handling.

use crate::config::FfmpegConfig;

/// Size of each stderr read.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Build forwarder arguments: loop the input forever, copy all streams, mux as FLV.
pub fn build_args(config: &FfmpegConfig, input_url: &str, output_url: &str) -> Vec<String> {
    let mut args = config.global_args.clone();
    args.extend(
        [
            "-stream_loop",
            "-1",
            "-i",
            input_url,
            "-c",
            "copy",
            "-f",
            "flv",
            output_url,
        ]
        .map(str::to_string),
    );
    args
}

/// Render a command line for logs and error messages.
pub fn command_line(binary: &str, args: &[String]) -> String {
    let mut line = binary.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Collapse ffmpeg's column padding, e.g. `frame=  100` becomes `frame=100`.
pub fn normalize_progress(chunk: &str) -> String {
    let mut line = chunk.to_string();
    while line.contains("= ") {
        line = line.replace("= ", "=");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_forwarding_template() {
        let args = build_args(
            &FfmpegConfig::default(),
            "rtmp://localhost/live/s1",
            "rtmp://push.example.com/live/abc",
        );
        assert_eq!(
            args,
            vec![
                "-stream_loop",
                "-1",
                "-i",
                "rtmp://localhost/live/s1",
                "-c",
                "copy",
                "-f",
                "flv",
                "rtmp://push.example.com/live/abc",
            ]
        );
    }

    #[test]
    fn global_args_come_first() {
        let config = FfmpegConfig {
            binary_path: "ffmpeg".to_string(),
            global_args: vec!["-hide_banner".to_string()],
        };
        let args = build_args(&config, "in", "out");
        assert_eq!(args.first().map(String::as_str), Some("-hide_banner"));
        assert_eq!(args.last().map(String::as_str), Some("out"));
        assert_eq!(command_line("ffmpeg", &args[..1]), "ffmpeg -hide_banner");
    }

    #[test]
    fn collapses_padding() {
        let raw = "frame=  100 fps=  25 q=  -1.0 size=     512kB time=  00:00:10.00 bitrate=  419.4kbits/s";
        assert_eq!(
            normalize_progress(raw),
            "frame=100 fps=25 q=-1.0 size=512kB time=00:00:10.00 bitrate=419.4kbits/s"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_progress("size=        0kB speed=   1x\r");
        assert!(!once.contains("= "));
        assert_eq!(normalize_progress(&once), once);
        assert_eq!(normalize_progress("no padding here"), "no padding here");
    }
}
