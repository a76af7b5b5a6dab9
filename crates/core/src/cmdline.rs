use std::fmt;

/// One `key=value` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdlineArg {
    pub key: String,
    pub value: String,
}

impl CmdlineArg {
    pub fn kv(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for CmdlineArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered kernel (or init) command line.
///
/// [`arg`](Self::arg) keeps a single instance of a key; [`push`](Self::push)
/// appends, for keys the guest reads repeatedly such as one entry per mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelCmdline {
    args: Vec<CmdlineArg>,
}

impl KernelCmdline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        self.args.retain(|a| a.key != key);
        self.args.push(CmdlineArg::kv(key, value));
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.args.push(CmdlineArg::kv(key, value));
        self
    }

    pub fn console(&mut self, device: &str) -> &mut Self {
        self.arg("console", device)
    }

    /// Each argument rendered on its own, for passing as an argv.
    pub fn to_args(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string()).collect()
    }

    pub fn build(&self) -> String {
        self.to_args().join(" ")
    }
}
