//! Operator input.
//!
//! Every stdin line is either a command or a bare barcode. A bare barcode is
//! a customer lookup while the staff face is locked, and a scan in the
//! current mode once it is unlocked.

use discreet_core::ScanMode;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A bare barcode.
    Barcode(String),
    Scan { barcode: String, mode: ScanMode },
    Lookup(String),
    SetMode(ScanMode),
    Unlock(String),
    Lock,
    Connect(String),
    Import(String),
    Export(String),
    CreateStore,
    AttachStore(String),
    DetachStore,
    RefreshStore,
    Stats,
    Status,
    Help,
    Quit,
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Ok(Command::Empty);
        };
        let arg = parts.next().map(str::to_string);

        let required = |what: &str| arg.clone().ok_or_else(|| format!("{head} needs {what}"));

        let command = match head.to_lowercase().as_str() {
            "sell" => Command::Scan {
                barcode: required("a barcode")?,
                mode: ScanMode::Sell,
            },
            "load" => Command::Scan {
                barcode: required("a barcode")?,
                mode: ScanMode::Load,
            },
            "lookup" | "find" => Command::Lookup(required("a barcode")?),
            "mode" => match required("sell or load")?.to_lowercase().as_str() {
                "sell" => Command::SetMode(ScanMode::Sell),
                "load" => Command::SetMode(ScanMode::Load),
                other => return Err(format!("unknown scan mode '{other}'")),
            },
            "unlock" | "pin" => Command::Unlock(required("a PIN")?),
            "lock" => Command::Lock,
            "connect" => Command::Connect(required("a connection code")?),
            "import" => Command::Import(required("a file path")?),
            "export" => Command::Export(required("a file path")?),
            "store" => match required("create, attach, detach or refresh")?.as_str() {
                "create" => Command::CreateStore,
                "attach" => Command::AttachStore(
                    parts
                        .next()
                        .map(str::to_string)
                        .ok_or_else(|| "store attach needs a store code".to_string())?,
                ),
                "detach" => Command::DetachStore,
                "refresh" => Command::RefreshStore,
                other => return Err(format!("unknown store command '{other}'")),
            },
            "stats" => Command::Stats,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ if arg.is_none() => Command::Barcode(head.to_string()),
            other => return Err(format!("unknown command '{other}'")),
        };

        Ok(command)
    }
}

pub const HELP: &str = "\
<barcode>              lookup (locked) or scan in current mode (unlocked)
lookup <barcode>       show product, sizes and other colors
unlock <pin> | lock    staff face
mode sell|load         scan mode
sell|load <barcode>    one-off scan
connect <code>         link to another terminal
import|export <path>   CSV
store create|attach <code>|detach|refresh
stats | status | quit";
