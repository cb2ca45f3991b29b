use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use jitgate::meta::SymDim;
use jitgate::{CacheRecord, CacheStore, DeviceKind, JsonCacheStore, KernelLoader, OperatorName};
use jitgate_runner_c::CHostLoader;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("eagercache {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "list" => run_list(&CacheArgs::parse(args.collect(), false)?),
        "check" => {
            let report = run_check(&CacheArgs::parse(args.collect(), true)?)?;
            if report.fatal.is_some() {
                bail!("cache would fail gate construction");
            }
            Ok(())
        }
        other => Err(anyhow!("unknown command '{other}'")),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CacheArgs {
    root: PathBuf,
    op: OperatorName,
    device: DeviceKind,
    load: bool,
}

impl CacheArgs {
    fn parse(raw_args: Vec<String>, allow_load: bool) -> Result<Self> {
        let mut root: Option<PathBuf> = None;
        let mut op: Option<OperatorName> = None;
        let mut device = DeviceKind::Cpu;
        let mut load = false;

        let mut i = 0usize;
        while i < raw_args.len() {
            match raw_args[i].as_str() {
                "--root" => {
                    i += 1;
                    root = raw_args.get(i).map(PathBuf::from);
                }
                "--device" => {
                    i += 1;
                    let name = raw_args
                        .get(i)
                        .ok_or_else(|| anyhow!("--device needs a value"))?;
                    device = DeviceKind::parse(name)
                        .ok_or_else(|| anyhow!("unknown device type '{name}'"))?;
                }
                "--load" if allow_load => load = true,
                flag if flag.starts_with("--") => bail!("unknown flag '{flag}'"),
                name => {
                    if op.is_some() {
                        bail!("unexpected argument '{name}'");
                    }
                    op = Some(
                        OperatorName::parse(name)
                            .ok_or_else(|| anyhow!("expected ns::op[.overload], got '{name}'"))?,
                    );
                }
            }
            i += 1;
        }

        Ok(Self {
            root: root.unwrap_or_else(jitgate::env::cache_dir),
            op: op.ok_or_else(|| anyhow!("missing operator name"))?,
            device,
            load,
        })
    }

    fn load_records(&self) -> Result<(PathBuf, Vec<CacheRecord>)> {
        let store = JsonCacheStore::new(self.root.clone());
        let path = store.path_for(&self.op.namespace, &self.op.name, &self.op.overload, self.device);
        let records = store
            .load(&self.op.namespace, &self.op.name, &self.op.overload, self.device)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok((path, records))
    }
}

fn format_dims(dims: &[SymDim]) -> String {
    let parts: Vec<String> = dims
        .iter()
        .map(|dim| match dim {
            SymDim::Concrete(value) => value.to_string(),
            SymDim::Symbolic => "?".to_string(),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

fn run_list(args: &CacheArgs) -> Result<()> {
    let (path, records) = args.load_records()?;
    println!("cache={}", path.display());
    println!("records={}", records.len());
    for (idx, record) in records.iter().enumerate() {
        println!("#{idx} kernel={}", record.kernel_path.display());
        match record.key() {
            Ok(Some(key)) => {
                for (pos, meta) in key.iter().enumerate() {
                    let scalar = meta
                        .scalar_value
                        .map(|value| format!(" value={}", value.as_f64()))
                        .unwrap_or_default();
                    println!(
                        "  [{pos}] {} {} sizes={} strides={}{}{scalar}",
                        meta.dtype,
                        meta.device,
                        format_dims(&meta.sizes),
                        format_dims(&meta.strides),
                        if meta.is_dynamic { " dynamic" } else { "" },
                    );
                }
            }
            Ok(None) => println!("  unusable metadata (skipped by the gate)"),
            Err(err) => println!("  invalid: {err}"),
        }
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct CheckReport {
    usable: usize,
    skipped: usize,
    unloadable: usize,
    fatal: Option<String>,
}

fn check_records(records: &[CacheRecord], device: DeviceKind, load: bool) -> CheckReport {
    let loader = CHostLoader::new();
    let mut report = CheckReport::default();
    for record in records {
        match record.key() {
            Ok(Some(key)) if !key.is_empty() => {
                if load && device.is_host() && loader.load(&record.kernel_path, device).is_none() {
                    report.unloadable += 1;
                } else {
                    report.usable += 1;
                }
            }
            Ok(_) => report.skipped += 1,
            Err(err) => {
                report.fatal.get_or_insert_with(|| err.to_string());
            }
        }
    }
    report
}

fn run_check(args: &CacheArgs) -> Result<CheckReport> {
    let (path, records) = args.load_records()?;
    let report = check_records(&records, args.device, args.load);
    println!("cache={}", path.display());
    println!("usable={}", report.usable);
    println!("skipped={}", report.skipped);
    if args.load {
        println!("unloadable={}", report.unloadable);
    }
    if let Some(fatal) = &report.fatal {
        println!("fatal={fatal}");
    }
    Ok(report)
}

fn print_help() {
    println!("eagercache {}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  eagercache list <ns::op[.overload]> [--root <dir>] [--device <cpu|cuda>]");
    println!("  eagercache check <ns::op[.overload]> [--root <dir>] [--device <cpu|cuda>] [--load]");
    println!("  eagercache version");
    println!();
    println!("The cache root defaults to JITGATE_CACHE_DIR or .cache/jitgate.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str], allow_load: bool) -> Result<CacheArgs> {
        CacheArgs::parse(raw.iter().map(|s| s.to_string()).collect(), allow_load)
    }

    #[test]
    fn parses_operator_and_flags() {
        let parsed = args(
            &["aten::add.Tensor", "--root", "/tmp/cache", "--device", "cuda", "--load"],
            true,
        )
        .unwrap();
        assert_eq!(parsed.op.to_string(), "aten::add.Tensor");
        assert_eq!(parsed.root, PathBuf::from("/tmp/cache"));
        assert_eq!(parsed.device, DeviceKind::Cuda);
        assert!(parsed.load);

        assert!(args(&["aten::add", "--load"], false).is_err());
        assert!(args(&["add"], false).is_err());
        assert!(args(&["--root", "/tmp"], false).is_err());
    }

    #[test]
    fn check_counts_usable_and_skipped_records() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = args(
            &["aten::relu", "--root", dir.path().to_str().unwrap()],
            true,
        )
        .unwrap();
        let store = JsonCacheStore::new(dir.path());
        let path = store.path_for("aten", "relu", "default", DeviceKind::Cpu);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"[
                {"kernel_path": "/k/relu.so", "meta_info": [
                    {"is_dynamic": false, "device_type": "cpu", "device_index": -1,
                     "dtype": "float32", "sizes": [4], "strides": [1]}]},
                {"kernel_path": "/k/relu-npu.so", "meta_info": [
                    {"is_dynamic": false, "device_type": "npu", "device_index": 0,
                     "dtype": "float32", "sizes": [4], "strides": [1]}]}
            ]"#,
        )
        .unwrap();

        let report = run_check(&parsed).unwrap();
        assert_eq!(report.usable, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.fatal.is_none());

        let (_, records) = parsed.load_records().unwrap();
        let loaded = check_records(&records, DeviceKind::Cpu, true);
        assert_eq!(loaded.unloadable, 1, "/k/relu.so does not exist");
    }
}
