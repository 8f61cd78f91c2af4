use std::fmt::{Display, Formatter};
use std::io::Write;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

#[cfg(feature = "buffered_out")]
use std::io::BufWriter;

use console::{pad_str, pad_str_with, style, Alignment};

/// Struct to hold the UI
/// Particularly the reporter thread draining the channel
pub struct UI {
    sender: UISender,
    handle: Option<JoinHandle<()>>,
}

#[derive(Clone, Default)]
pub struct UISender {
    sender: Option<Sender<UIMessage>>,
}

impl UISender {
    /// Sender that drops every message.
    pub fn sink() -> Self {
        UISender { sender: None }
    }

    /// Send typed UIMessage to internal channel
    pub fn send(&self, user_msg: UIUserMessage) {
        #[cfg(not(feature = "disable_ui"))]
        {
            if let Some(sender) = &self.sender {
                // the reporter may already be gone after ExitUi
                let _ = sender.send(UIMessage {
                    thread_id: std::thread::current().id(),
                    message: user_msg,
                });
            }
        }
        #[cfg(feature = "disable_ui")]
        let _ = user_msg;
    }
}

impl UI {
    pub fn get_sender(&self) -> UISender {
        self.sender.clone()
    }

    pub fn new() -> Self {
        let (sender, receiver) = channel();

        #[cfg(not(feature = "disable_ui"))]
        let handle = Some(std::thread::spawn(move || {
            let stdout = std::io::stdout();

            #[cfg(not(feature = "buffered_out"))]
            let out = stdout;
            #[cfg(feature = "buffered_out")]
            let out = BufWriter::with_capacity(512, stdout);

            // nothing sensible to do if stdout is gone
            let _ = report(&receiver, out);
        }));

        #[cfg(feature = "disable_ui")]
        let handle = {
            drop(receiver);
            None
        };

        UI {
            sender: UISender {
                sender: Some(sender),
            },
            handle,
        }
    }

    /// Prints the statistics block and waits for the reporter to finish.
    pub fn shutdown(mut self, best: Option<f64>) {
        self.sender.send(UIUserMessage::ExitUi { best });
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for UI {
    fn default() -> Self {
        UI::new()
    }
}

#[cfg_attr(feature = "disable_ui", allow(dead_code))]
fn report<W: Write>(receiver: &Receiver<UIMessage>, mut out: W) -> std::io::Result<()> {
    let start_time = Instant::now();

    let mut total_pricing_runtime = 0.0;
    let mut total_lp_runtime = 0.0;
    let mut k_visits = 0usize;
    let mut pruned = 0usize;

    while let Ok(UIMessage { thread_id, message }) = receiver.recv() {
        let time = start_time.elapsed().as_secs_f64();
        match message {
            UIUserMessage::TimeLimitReached => {
                writeln!(out, "{}", style("Time Limit Reached").yellow().bold())?;
            }
            UIUserMessage::Log(msg) => writeln!(out, "[{thread_id:?}] {time:>6.2}  {msg}")?,
            UIUserMessage::LogS(msg) => writeln!(out, "[{thread_id:?}] {time:>6.2}  {msg}")?,
            UIUserMessage::StartPhase(title, level) => {
                let width = 30usize.saturating_sub(4 * usize::from(level)).max(10);
                writeln!(out, "{}", pad_str_with(&format!("{thread_id:?}"), width, Alignment::Center, None, '⎯'))?;
                writeln!(out, "{}", style(pad_str(title, width, Alignment::Center, None)).green())?;
                writeln!(out, "{}", "⎯".repeat(width))?;
                out.flush()?;
            }
            UIUserMessage::KVisitStart(state) => {
                k_visits += 1;
                writeln!(out, "[{thread_id:?}] {time:>6.2} started   {state}")?;
                out.flush()?;
            }
            UIUserMessage::KVisitFinish(state) => {
                writeln!(out, "[{thread_id:?}] {time:>6.2} completed {state}")?;
                out.flush()?;
            }
            UIUserMessage::LPSolveIterationFinish(state) => {
                total_lp_runtime += state.lp_runtime;
                writeln!(
                    out,
                    "{}",
                    style(format!("[{thread_id:?}] {time:>6.2} lp iteration {state}")).dim()
                )?;
            }
            UIUserMessage::PricingProblemFinish(state) => {
                // always needed for statistics
                total_pricing_runtime += state.runtime;
                writeln!(
                    out,
                    "{}",
                    style(format!("[{thread_id:?}] {time:>6.2} pricing iteration {state}")).dim()
                )?;
            }
            UIUserMessage::ColumnsPruned { k, removed } => {
                pruned += removed;
                writeln!(
                    out,
                    "{}",
                    style(format!("[{thread_id:?}] {time:>6.2} k={k} pruned {removed} idle columns")).dim()
                )?;
            }
            UIUserMessage::NewBest { obj, k } => {
                writeln!(
                    out,
                    "[{thread_id:?}] {time:>6.2}  {} {} (k={k})",
                    style("Has new best:").black().on_green().bold(),
                    style(format!("{obj:.4}")).bold()
                )?;
                out.flush()?;
            }
            UIUserMessage::ExitUi { best } => {
                writeln!(out, "{}", pad_str_with("Statistics", 30, Alignment::Center, None, '⎯'))?;
                writeln!(
                    out,
                    "total_lp_time: {total_lp_runtime:>8.2}s / total_pricing_time: {total_pricing_runtime:>8.2}s"
                )?;
                let busy = total_lp_runtime + total_pricing_runtime;
                if busy > 0.0 {
                    writeln!(out, "{:>3.1}% spent in pricing vs lp", total_pricing_runtime / busy * 100.0)?;
                }
                writeln!(out, "k visits: {k_visits}  pruned columns: {pruned}  wall: {time:.2}s")?;
                match best {
                    Some(obj) => writeln!(out, "best: {obj:.4}")?,
                    None => writeln!(out, "{}", style("best: none").yellow())?,
                }
                writeln!(out, "{}", "⎯".repeat(30))?;
                break;
            }
        }
    }

    out.flush()
}

/// Progress of one visit of an aisle count
#[derive(Clone, Debug)]
pub struct KVisitUIState {
    pub k: usize,
    pub visit: u32,
    pub num_columns: usize,
    pub rounds: usize,
    pub lp_bound: Option<f64>,
    pub dual_bound: Option<f64>,
    pub objective: Option<f64>,
    /// Set in visit finish only
    pub outcome: Option<String>,
}

impl Display for KVisitUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        write!(
            f,
            "k={k} visit=<{visit}> cols=<{cols}> rounds=<{rounds}> lp=<{lp}> bound=<{bound}> obj=<{obj}>",
            k = self.k,
            visit = self.visit,
            cols = self.num_columns,
            rounds = self.rounds,
            lp = opt(self.lp_bound),
            bound = opt(self.dual_bound),
            obj = opt(self.objective),
        )?;
        if let Some(outcome) = &self.outcome {
            write!(f, " {outcome}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
/// Holds all state updates that can influence the UI
pub enum UIUserMessage {
    LogS(&'static str),
    Log(String),
    TimeLimitReached,
    StartPhase(&'static str, u8),
    ExitUi { best: Option<f64> },

    KVisitStart(KVisitUIState),
    KVisitFinish(KVisitUIState),

    LPSolveIterationFinish(LPSolveIterationUIState),
    PricingProblemFinish(PricingProblemUIState),
    ColumnsPruned { k: usize, removed: usize },

    NewBest { obj: f64, k: usize },
}

#[derive(Clone, Debug)]
pub struct PricingProblemUIState {
    pub runtime: f64,
    pub num_columns: usize,
    pub smoothing_alpha: f64,
    pub dual_bound: Option<f64>,
}

impl Display for PricingProblemUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pricing_runtime=<{:>5.2}> num_cols=<{}> alpha=<{:.2}> dual_bound=<{}>",
            self.runtime,
            self.num_columns,
            self.smoothing_alpha,
            self.dual_bound.map_or_else(|| "-".to_string(), |db| format!("{db:.4}"))
        )
    }
}

#[derive(Clone, Debug)]
pub struct LPSolveIterationUIState {
    pub k: usize,
    pub obj: f64,
    pub best_dual_bound: Option<f64>,
    pub lp_runtime: f64,
    pub num_columns: usize,
    pub num_new_columns: usize,
    pub previous_pricing_runtime: f64,
}

impl Display for LPSolveIterationUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "k={} obj=<{:>10.4}> bound=<{}>: lp_runtime=<{:>5.2}> prev_pricing_runtime=<{:>5.2}> cols=<{}/+{}>",
            self.k,
            self.obj,
            self.best_dual_bound
                .map_or_else(|| "-".to_string(), |db| format!("{db:>10.4}")),
            self.lp_runtime,
            self.previous_pricing_runtime,
            self.num_columns,
            self.num_new_columns
        )
    }
}

#[derive(Clone, Debug)]
pub struct UIMessage {
    pub thread_id: ThreadId,
    pub message: UIUserMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_and_closed_channels_never_panic() {
        UISender::sink().send(UIUserMessage::LogS("dropped"));

        let ui = UI::new();
        let sender = ui.get_sender();
        ui.shutdown(Some(1.5));
        sender.send(UIUserMessage::Log("after exit".to_string()));
    }

    #[test]
    fn states_render() {
        let state = KVisitUIState {
            k: 3,
            visit: 1,
            num_columns: 12,
            rounds: 4,
            lp_bound: Some(10.0),
            dual_bound: None,
            objective: Some(3.25),
            outcome: Some("ok".to_string()),
        };
        let text = state.to_string();
        assert!(text.starts_with("k=3 visit=<1> cols=<12>"));
        assert!(text.contains("bound=<->"));
        assert!(text.ends_with(" ok"));
    }
}
