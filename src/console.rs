//! Line-oriented stand-in for the graphical front-end.
//! `slide [distance]` drives a DragSlider; a full-length slide activates SOS.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::session::SessionSnapshot;
use crate::slider::{DragSlider, SliderGeometry};
use crate::AppContext;

const TRACK: SliderGeometry = SliderGeometry {
    track_left: 0.0,
    track_width: 384.0,
    thumb_width: 48.0,
};

pub(crate) async fn run_console(ctx: AppContext) -> std::io::Result<()> {
    // Notices are printed as they arrive, off the async runtime.
    let notices = ctx.notices.clone();
    std::thread::Builder::new()
        .name("notices".into())
        .spawn(move || {
            for notice in notices.iter() {
                println!("[{}] {}", notice.title(), notice.description());
            }
        })?;

    let mut states = ctx.session.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("SOS state: {state}");
        }
    });

    let (activate_tx, mut activate_rx) = mpsc::unbounded_channel::<()>();
    let activator = Arc::clone(&ctx.session);
    tokio::spawn(async move {
        while activate_rx.recv().await.is_some() {
            if let Err(e) = activator.activate().await {
                warn!(error = %e, "activation failed");
            }
        }
    });
    let mut slider = DragSlider::new(TRACK, move || {
        let _ = activate_tx.send(());
    });

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                ctx.session.deactivate();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            ctx.session.deactivate();
            break;
        };
        let mut words = line.split_whitespace();
        match words.next() {
            Some("slide") => {
                if ctx.session.is_active() {
                    println!("SOS is already active.");
                    continue;
                }
                let distance = match words.next().map(str::parse::<f64>) {
                    None => TRACK.max_position(),
                    Some(Ok(d)) => d,
                    Some(Err(_)) => {
                        println!("usage: slide [distance]");
                        continue;
                    }
                };
                slide(&mut slider, distance);
            }
            Some("stop") => {
                if !ctx.session.deactivate() {
                    println!("SOS is not active.");
                }
            }
            Some("status") => print_status(&ctx.session.snapshot()),
            Some("log") => {
                for entry in ctx.session.log().rendered() {
                    println!("{entry}");
                }
            }
            Some("quit") | Some("exit") => {
                ctx.session.deactivate();
                break;
            }
            Some("help") => print_help(),
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }
    Ok(())
}

/// One full gesture: press, drag the thumb `distance` units, release.
fn slide<F: FnMut()>(slider: &mut DragSlider<F>, distance: f64) {
    let geometry = slider.geometry();
    slider.press();
    slider.move_to(geometry.track_left + geometry.thumb_width / 2.0 + distance);
    let opacity = slider.label_opacity();
    if !slider.release() {
        println!("Released at {distance:.0} (label opacity {opacity:.2}); slide all the way to activate.");
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    println!("SOS:          {}", snapshot.state);
    println!("Live feed:    {} ({})", snapshot.feed_status(), snapshot.stream_state);
    println!("Geolocation:  {}", snapshot.geolocation_status());
    println!("AI analysis:  {}", snapshot.threat_status());
    if let Some((keywords, confidence)) = snapshot.threat_details() {
        println!("  Keywords:   {keywords}");
        println!("  Confidence: {confidence}");
    }
    println!("Evidence:     {}", snapshot.evidence_status());
}

fn print_help() {
    println!("commands: slide [distance] | stop | status | log | help | quit");
}
