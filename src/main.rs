//! 青鸾向导命令行
//!
//! 同步 REPL：每行输入作为一次请求，输出按片段实时打印。
//! 用法：`qingluan [user] [conversation]`
//! 命令：`/role <general|planning|document>`、`/clear`、`/stats`、`/quit`

use std::io::{self, BufRead, Write};

use anyhow::Context;
use qingluan::{load_config, observability, AgentRole, AgentService};

fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let user = args.next().unwrap_or_else(|| "cli".to_string());
    let conversation = args.next().unwrap_or_else(|| "default".to_string());

    let cfg = load_config(None).context("Failed to load config")?;
    let service = AgentService::from_config(&cfg).context("Failed to create agent service")?;
    let mut role = AgentRole::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("[{role}] > ");
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        match input {
            "" => {}
            "/quit" | "/exit" => break,
            "/clear" => {
                let removed = service.clear_user(&user);
                println!("cleared {removed} session(s) for {user}");
            }
            "/stats" => {
                let stats = service.memory_stats()?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            cmd if cmd.starts_with("/role") => {
                let name = cmd.trim_start_matches("/role").trim();
                role = AgentRole::parse_lossy(name);
                println!("role: {role}");
            }
            request => {
                for chunk in service.handle(request, &user, &conversation, role) {
                    print!("{chunk}");
                    stdout.flush()?;
                }
                println!();
            }
        }
        print!("[{role}] > ");
        stdout.flush()?;
    }
    Ok(())
}
