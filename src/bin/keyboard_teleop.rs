// Keyboard teleop publishing controller snapshots
//
// Terminals report no key releases, so held buttons are toggles and sticks
// fall back to center after a short time without input.
//
//   Tab        toggle drive enable (RB)
//   L          toggle line follow (LB)
//   H          toggle homing combo (LT + RT)
//   Enter      confirm homing (A)
//   WASD       translate, Z/X rotate
//   Up/Down    line follow forward / reverse
//   R/F        stick deflection up / down
//   Q / Esc    quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use swerve_runtime::config::TOPIC_CMD_OPERATOR;
use swerve_runtime::messages::OperatorInput;
use tracing::info;

const DEFLECTIONS: [f64; 3] = [0.4, 0.75, 1.0]; // stick fraction
const INPUT_TIMEOUT_MS: u64 = 100; // Center sticks after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_OPERATOR).await?;

    info!("Controls: Tab=drive, L=line, H=homing, Enter=confirm, WASD=move, Z/X=rotate, Q=quit");
    info!("Deflection: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut deflection_idx: usize = 0;
    let mut input = OperatorInput::default();
    let mut last_momentary_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let deflection = DEFLECTIONS[deflection_idx];
                let axes = &mut input.axes;
                let buttons = &mut input.buttons;

                match code {
                    // Toggles
                    KeyCode::Tab if kind == KeyEventKind::Press => {
                        buttons.rb = !buttons.rb;
                        info!("Drive enable: {}", buttons.rb);
                    }
                    KeyCode::Char('l') if kind == KeyEventKind::Press => {
                        buttons.lb = !buttons.lb;
                        info!("Line follow: {}", buttons.lb);
                    }
                    KeyCode::Char('h') if kind == KeyEventKind::Press => {
                        buttons.lt = !buttons.lt;
                        buttons.rt = buttons.lt;
                        axes.lt = if buttons.lt { 1.0 } else { 0.0 };
                        axes.rt = axes.lt;
                        info!("Homing combo: {}", buttons.lt);
                    }

                    // Momentary - refresh timestamp
                    KeyCode::Enter if pressed => {
                        buttons.a = true;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Up if pressed => {
                        buttons.d_up = true;
                        buttons.d_down = false;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Down if pressed => {
                        buttons.d_down = true;
                        buttons.d_up = false;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Char('w') if pressed => {
                        axes.left_y = deflection;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        axes.left_y = -deflection;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        axes.left_x = -deflection;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        axes.left_x = deflection;
                        last_momentary_input = Instant::now();
                    }

                    // Rotation (positive clockwise)
                    KeyCode::Char('z') if pressed => {
                        axes.right_x = -deflection;
                        last_momentary_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        axes.right_x = deflection;
                        last_momentary_input = Instant::now();
                    }

                    // Deflection control
                    KeyCode::Char('r') if pressed => {
                        deflection_idx = (deflection_idx + 1).min(2);
                        print_deflection(deflection_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        deflection_idx = deflection_idx.saturating_sub(1);
                        print_deflection(deflection_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Release momentary inputs after INPUT_TIMEOUT_MS
        if last_momentary_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            input.axes.left_x = 0.0;
            input.axes.left_y = 0.0;
            input.axes.right_x = 0.0;
            input.buttons.a = false;
            input.buttons.d_up = false;
            input.buttons.d_down = false;
        }

        // Always publish at ~50Hz
        publisher.put(serde_json::to_string(&input)?).await?;
    }

    // Leave the runtime with everything released
    publisher
        .put(serde_json::to_string(&OperatorInput::default())?)
        .await?;
    Ok(())
}

fn print_deflection(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Deflection: {}", label);
}
