//! Line-based prompts and the setup questionnaire

use peercall_core::media::DeviceInfo;
use peercall_core::setup::{SetupForm, SetupResult};
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

/// Line reader with prompt output
pub struct Console<R> {
    lines: Lines<R>,
}

/// Console over the process stdin
pub fn stdin_console() -> Console<BufReader<Stdin>> {
    Console::new(BufReader::new(tokio::io::stdin()))
}

impl<R: AsyncBufRead + Unpin> Console<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next raw line; `None` at end of input
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.lines.next_line().await
    }

    /// Print a question and read the trimmed answer
    pub async fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        print!("{} ", question);
        io::stdout().flush()?;
        Ok(self.next_line().await?.map(|line| line.trim().to_string()))
    }

    /// Yes/no question; an empty answer takes the default
    pub async fn ask_yes_no(&mut self, question: &str, default: bool) -> io::Result<Option<bool>> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let Some(answer) = self.ask(&format!("{} {}", question, hint)).await? else {
                return Ok(None);
            };
            match answer.to_lowercase().as_str() {
                "" => return Ok(Some(default)),
                "y" | "yes" => return Ok(Some(true)),
                "n" | "no" => return Ok(Some(false)),
                _ => println!("Please answer y or n."),
            }
        }
    }

    /// Pick one device by number; an empty answer keeps `current`
    pub async fn choose_device(
        &mut self,
        what: &str,
        devices: &[DeviceInfo],
        current: Option<&str>,
    ) -> io::Result<Option<String>> {
        for (index, device) in devices.iter().enumerate() {
            let marker = if Some(device.device_id.as_str()) == current {
                "*"
            } else {
                " "
            };
            println!(" {} {}) {}", marker, index + 1, device.display_label());
        }

        loop {
            let Some(answer) = self.ask(&format!("Choose {} [1-{}]:", what, devices.len())).await?
            else {
                return Ok(None);
            };
            if answer.is_empty() {
                if let Some(current) = current {
                    return Ok(Some(current.to_string()));
                }
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=devices.len()).contains(&n) => {
                    return Ok(Some(devices[n - 1].device_id.clone()));
                }
                _ => println!("Enter a number between 1 and {}.", devices.len()),
            }
        }
    }
}

/// Walk the user through the setup form
///
/// Returns `None` if input ends before the form is confirmed.
pub async fn run_setup<R: AsyncBufRead + Unpin>(
    console: &mut Console<R>,
    form: &mut SetupForm,
) -> anyhow::Result<Option<SetupResult>> {
    let devices = form.devices().clone();
    println!(
        "Found {} camera(s) and {} microphone(s).",
        devices.cameras.len(),
        devices.microphones.len()
    );

    loop {
        let question = if form.name().is_empty() {
            "Display name:".to_string()
        } else {
            format!("Display name [{}]:", form.name())
        };
        let Some(answer) = console.ask(&question).await? else {
            return Ok(None);
        };
        if !answer.is_empty() {
            form.set_name(answer);
        }
        if form.can_start() {
            break;
        }
        println!("A display name is required.");
    }

    let Some(video) = console.ask_yes_no("Enable camera?", form.video_enabled()).await? else {
        return Ok(None);
    };
    form.set_video_enabled(video);
    if video && devices.cameras.len() > 1 {
        let current = form.selected_camera().map(str::to_string);
        let Some(id) = console
            .choose_device("camera", &devices.cameras, current.as_deref())
            .await?
        else {
            return Ok(None);
        };
        form.select_camera(&id)?;
    }

    let Some(audio) = console
        .ask_yes_no("Enable microphone?", form.audio_enabled())
        .await?
    else {
        return Ok(None);
    };
    form.set_audio_enabled(audio);
    if audio && devices.microphones.len() > 1 {
        let current = form.selected_microphone().map(str::to_string);
        let Some(id) = console
            .choose_device("microphone", &devices.microphones, current.as_deref())
            .await?
        else {
            return Ok(None);
        };
        form.select_microphone(&id)?;
    }

    Ok(Some(form.confirm()?))
}
