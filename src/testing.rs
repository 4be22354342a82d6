//! In-memory [`Host`] for scenario tests
//!
//! Commands are matched on `(program, first argument)` and mutate a small
//! model of processes, interfaces and IPsec SAs. Every process-affecting call
//! is appended to an event log so tests can assert on ordering.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Mutex;

use crate::error::VpnResult;
use crate::host::{CommandOutput, Host, Invocation, Signal};

#[derive(Debug, Clone)]
enum Effect {
    /// Start a daemon that owns an addressed interface
    Tunnel { process: String, interface: String, address: Ipv4Addr },
    RemoveInterface(String),
    IpsecUp { conn: String, address: Ipv4Addr },
    IpsecDown(String),
    Fail(String),
}

#[derive(Debug)]
struct FakeInterface {
    address: Option<Ipv4Addr>,
    owner: Option<u32>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_pid: u32,
    processes: BTreeMap<u32, String>,
    interfaces: BTreeMap<String, FakeInterface>,
    ipsec: BTreeMap<String, Ipv4Addr>,
    rules: HashMap<(String, String), Effect>,
    stubborn: HashSet<String>,
    never_ready: HashSet<String>,
    events: Vec<String>,
}

impl FakeState {
    fn alloc_pid(&mut self) -> u32 {
        self.next_pid += 1;
        1000 + self.next_pid
    }

    fn start(&mut self, process: &str, interface: &str, address: Ipv4Addr) -> u32 {
        let pid = self.alloc_pid();
        self.processes.insert(pid, process.to_string());
        if !self.never_ready.contains(process) {
            self.interfaces.insert(
                interface.to_string(),
                FakeInterface { address: Some(address), owner: Some(pid) },
            );
        }
        pid
    }

    fn apply(&mut self, cmd: &Invocation) -> CommandOutput {
        let key = (cmd.program.clone(), cmd.args.first().cloned().unwrap_or_default());
        let ok = CommandOutput { code: Some(0), ..Default::default() };

        match self.rules.get(&key).cloned() {
            Some(Effect::Tunnel { process, interface, address }) => {
                self.start(&process, &interface, address);
                ok
            }
            Some(Effect::RemoveInterface(name)) => {
                self.interfaces.remove(&name);
                ok
            }
            Some(Effect::IpsecUp { conn, address }) => {
                self.ipsec.insert(conn, address);
                ok
            }
            Some(Effect::IpsecDown(conn)) => {
                self.ipsec.remove(&conn);
                ok
            }
            Some(Effect::Fail(stderr)) => CommandOutput { code: Some(1), stderr, ..Default::default() },
            None => ok,
        }
    }

    fn ipsec_status(&self, conn: &str) -> CommandOutput {
        let stdout = match self.ipsec.get(conn) {
            Some(addr) => format!(
                "Security Associations (1 up, 0 connecting):\n\
                 \x20     {conn}[1]: ESTABLISHED 2 seconds ago, 192.168.1.10[client]...203.0.113.1[gw]\n\
                 \x20     {conn}{{1}}:  INSTALLED, TUNNEL, reqid 1, ESP in UDP SPIs: c1a2b3c4_i c4b3a2c1_o\n\
                 \x20     {conn}{{1}}:   {addr}/32 === 0.0.0.0/0\n"
            ),
            None => String::new(),
        };
        CommandOutput { code: Some(0), stdout, ..Default::default() }
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the stock command line of every backend
    pub fn standard() -> Self {
        let host = Self::new();
        host.rule("openvpn", "--config", Effect::Tunnel {
            process: "openvpn".into(),
            interface: "tun0".into(),
            address: Ipv4Addr::new(10, 8, 0, 2),
        });
        host.rule("wg-quick", "up", Effect::Tunnel {
            // wg-quick leaves no daemon; the pseudo process is never looked up
            process: "wg-quick".into(),
            interface: "wg0".into(),
            address: Ipv4Addr::new(10, 0, 0, 2),
        });
        host.rule("wg-quick", "down", Effect::RemoveInterface("wg0".into()));
        host.rule("ipsec", "up", Effect::IpsecUp {
            conn: "office".into(),
            address: Ipv4Addr::new(10, 10, 0, 5),
        });
        host.rule("ipsec", "down", Effect::IpsecDown("office".into()));
        host.rule("pppd", "file", Effect::Tunnel {
            process: "pppd".into(),
            interface: "ppp0".into(),
            address: Ipv4Addr::new(192, 168, 100, 2),
        });
        host
    }

    fn rule(&self, program: &str, first_arg: &str, effect: Effect) {
        let mut state = self.state.lock().unwrap();
        state.rules.insert((program.to_string(), first_arg.to_string()), effect);
    }

    /// Make `program <first_arg> ...` exit 1 with `stderr`
    pub fn fail(&self, program: &str, first_arg: &str, stderr: &str) {
        self.rule(program, first_arg, Effect::Fail(stderr.to_string()));
    }

    /// The named daemon starts but its interface never appears
    pub fn never_ready(&self, process: &str) {
        self.state.lock().unwrap().never_ready.insert(process.to_string());
    }

    /// The named daemon ignores every signal
    pub fn make_stubborn(&self, process: &str) {
        self.state.lock().unwrap().stubborn.insert(process.to_string());
    }

    /// Bring up a tunnel without going through any backend
    pub fn start_tunnel(&self, process: &str, interface: &str, address: Ipv4Addr) -> u32 {
        self.state.lock().unwrap().start(process, interface, address)
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn run(&self, cmd: &Invocation) -> VpnResult<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        if cmd.program == "ipsec" && cmd.args.first().map(String::as_str) == Some("status") {
            let conn = cmd.args.get(1).cloned().unwrap_or_default();
            return Ok(state.ipsec_status(&conn));
        }
        state.events.push(format!("run {}", cmd));
        Ok(state.apply(cmd))
    }

    async fn spawn_detached(&self, cmd: &Invocation, _log: &Path) -> VpnResult<u32> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("spawn {}", cmd));
        state.apply(cmd);
        // The helper itself exits once its work is done
        Ok(state.alloc_pid())
    }

    async fn find_process(&self, name: &str) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .processes
            .iter()
            .find(|(_, process)| process.as_str() == name)
            .map(|(pid, _)| *pid)
    }

    async fn process_alive(&self, pid: u32) -> bool {
        self.state.lock().unwrap().processes.contains_key(&pid)
    }

    async fn signal(&self, pid: u32, signal: Signal) -> VpnResult<()> {
        let mut state = self.state.lock().unwrap();
        let name = match signal {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        };
        state.events.push(format!("signal {} {}", pid, name));

        let stubborn = state
            .processes
            .get(&pid)
            .is_some_and(|process| state.stubborn.contains(process));
        if !stubborn {
            state.processes.remove(&pid);
            state.interfaces.retain(|_, iface| iface.owner != Some(pid));
        }
        Ok(())
    }

    async fn interface_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().interfaces.contains_key(name)
    }

    async fn interface_ipv4(&self, name: &str) -> Option<Ipv4Addr> {
        self.state.lock().unwrap().interfaces.get(name)?.address
    }
}
