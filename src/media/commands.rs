use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::error::{Result, AutodubError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Seek before the next input (fast, timestamps restart at zero)
    pub fn seek(self, start: f64) -> Self {
        self.arg("-ss").arg(start.to_string())
    }

    /// Limit output duration
    pub fn duration(self, secs: f64) -> Self {
        self.arg("-t").arg(secs.to_string())
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Set audio bitrate
    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Add audio filter
    pub fn audio_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-af").arg(filter)
    }

    /// Add a complex filter graph
    pub fn filter_complex<S: Into<String>>(self, graph: S) -> Self {
        self.arg("-filter_complex").arg(graph)
    }

    /// Read an audio filter from a script file (for graphs longer than the
    /// command line allows)
    pub fn audio_filter_script<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-filter_script:a").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Map a stream into the output
    pub fn map<S: Into<String>>(self, stream: S) -> Self {
        self.arg("-map").arg(stream)
    }

    /// Add a lavfi silent source input of the given duration
    pub fn silent_input(self, sample_rate: u32, secs: f64) -> Self {
        self.arg("-f")
            .arg("lavfi")
            .arg("-t")
            .arg(secs.to_string())
            .arg("-i")
            .arg(format!("anullsrc=r={}:cl=mono", sample_rate))
    }

    /// Execute the command
    pub fn execute(&self) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .map_err(|e| AutodubError::Media(format!("Failed to execute media processor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutodubError::Media(format!(
                "{} failed: {}",
                self.description, stderr
            )));
        }

        Ok(())
    }

    /// Execute and return stderr even on success. FFmpeg reports filter
    /// measurements (loudnorm) on stderr.
    pub fn execute_capturing_stderr(&self) -> Result<String> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .map_err(|e| AutodubError::Media(format!("Failed to execute media processor: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(AutodubError::Media(format!(
                "{} failed: {}",
                self.description, stderr
            )));
        }
        Ok(stderr)
    }

    /// Execute and return stdout (ffprobe queries)
    pub fn execute_capturing_stdout(&self) -> Result<String> {
        debug!("Executing media probe command: {} {:?}", self.binary_path, self.args);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .map_err(|e| AutodubError::Media(format!("Failed to execute media probe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutodubError::Media(format!(
                "{} failed: {}",
                self.description, stderr
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Loudness values measured by a first loudnorm pass, fed verbatim into the
/// second pass. FFmpeg emits them as quoted strings in the JSON blob.
#[derive(Debug, Clone)]
pub struct LoudnessMeasurement {
    pub input_i: String,
    pub input_tp: String,
    pub input_lra: String,
    pub input_thresh: String,
}

/// Extract the loudnorm measurement JSON blob embedded at the end of an
/// ffmpeg stderr dump.
pub fn parse_loudness_measurement(stderr: &str) -> Result<LoudnessMeasurement> {
    let start = stderr
        .rfind('{')
        .ok_or_else(|| AutodubError::Media("No loudnorm measurement in ffmpeg output".to_string()))?;
    let end = stderr
        .rfind('}')
        .ok_or_else(|| AutodubError::Media("No loudnorm measurement in ffmpeg output".to_string()))?;
    if end <= start {
        return Err(AutodubError::Media("Malformed loudnorm measurement block".to_string()));
    }

    let value: serde_json::Value = serde_json::from_str(&stderr[start..=end])
        .map_err(|e| AutodubError::Media(format!("Failed to parse loudnorm measurement: {}", e)))?;

    let field = |name: &str| -> Result<String> {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AutodubError::Media(format!("loudnorm measurement missing field {}", name))
            })
    };

    Ok(LoudnessMeasurement {
        input_i: field("input_i")?,
        input_tp: field("input_tp")?,
        input_lra: field("input_lra")?,
        input_thresh: field("input_thresh")?,
    })
}

/// Builder for common media processing operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build custom command
    pub fn custom<S: Into<String>>(&self, description: S) -> MediaCommand {
        MediaCommand::new(&self.binary_path, description.into())
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_arg_order() {
        let cmd = MediaCommandBuilder::new("ffmpeg")
            .custom("Trim")
            .overwrite()
            .seek(60.0)
            .input("in.mkv")
            .duration(30.0)
            .copy_video()
            .output("out.mp4");

        assert_eq!(
            cmd.args,
            vec!["-y", "-ss", "60", "-i", "in.mkv", "-t", "30", "-c:v", "copy", "out.mp4"]
        );
    }

    #[test]
    fn test_parse_loudness_measurement() {
        let stderr = r#"
[Parsed_loudnorm_0 @ 0x5555]
{
	"input_i" : "-27.61",
	"input_tp" : "-4.47",
	"input_lra" : "18.06",
	"input_thresh" : "-39.20",
	"output_i" : "-16.58",
	"normalization_type" : "dynamic",
	"target_offset" : "0.58"
}
"#;
        let m = parse_loudness_measurement(stderr).unwrap();
        assert_eq!(m.input_i, "-27.61");
        assert_eq!(m.input_tp, "-4.47");
        assert_eq!(m.input_lra, "18.06");
        assert_eq!(m.input_thresh, "-39.20");
    }

    #[test]
    fn test_parse_loudness_measurement_missing_blob() {
        assert!(parse_loudness_measurement("no json here").is_err());
    }
}
