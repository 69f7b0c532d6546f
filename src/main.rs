// ==========================================
// 学习成果达成度引擎 - 命令行入口
// ==========================================
// 用法:
//   outcome-attainment evaluate <course_id>
//   outcome-attainment grades <course_id>
//   outcome-attainment programme <programme_id> <from_year> <to_year>
//   outcome-attainment student <student_id>
//   outcome-attainment refresh [plo|po|all]
//   outcome-attainment status
//
// 数据库路径: 环境变量 OUTCOME_DB_PATH,否则用户数据目录
// 输出: 标准输出 JSON,日志写 stderr
// ==========================================

use outcome_attainment::app::{get_default_db_path, AppState};
use outcome_attainment::materializer::CacheRefreshScope;
use outcome_attainment::{logging, VERSION};
use serde::Serialize;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const USAGE: &str = "用法: outcome-attainment <evaluate <course_id> | grades <course_id> | \
programme <programme_id> <from_year> <to_year> | student <student_id> | refresh [plo|po|all] | status>";

fn parse_arg<T: std::str::FromStr>(value: Option<&String>, name: &str) -> CliResult<T> {
    let raw = value.ok_or_else(|| format!("缺少参数 {}\n{}", name, USAGE))?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("参数 {} 无效: {}", name, raw).into())
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(state: &AppState, args: &[String]) -> CliResult<()> {
    let command = args.first().map(String::as_str).ok_or(USAGE)?;
    let api = &state.report_api;

    match command {
        "evaluate" => {
            let course_id: i64 = parse_arg(args.get(1), "course_id")?;
            print_json(&api.evaluate_outcome_attainment(course_id)?)
        }
        "grades" => {
            let course_id: i64 = parse_arg(args.get(1), "course_id")?;
            print_json(&api.compute_grade_distribution(course_id)?)
        }
        "programme" => {
            let programme_id: i64 = parse_arg(args.get(1), "programme_id")?;
            let from_year: i32 = parse_arg(args.get(2), "from_year")?;
            let to_year: i32 = parse_arg(args.get(3), "to_year")?;
            print_json(&api.get_course_outcome_success_rate(programme_id, from_year, to_year)?)
        }
        "student" => {
            let student_id: i64 = parse_arg(args.get(1), "student_id")?;
            print_json(&api.get_student_outcome_history(student_id)?)
        }
        "refresh" => {
            let raw = args.get(1).map(String::as_str).unwrap_or("all");
            let scope = CacheRefreshScope::from_str(raw)
                .ok_or_else(|| format!("未知刷新范围: {} (可选 plo / po / all)", raw))?;
            print_json(&api.refresh_outcome_cache(scope).await?)
        }
        "status" => print_json(&api.cache_status()?),
        other => Err(format!("未知命令: {}\n{}", other, USAGE).into()),
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let db_path = get_default_db_path();
    tracing::info!(version = VERSION, db_path = %db_path, "学习成果达成度引擎启动");

    let state = AppState::new(db_path)?;
    let result = run(&state, &args).await;
    state.shutdown().await;

    if let Err(e) = &result {
        tracing::error!("命令执行失败: {}", e);
    }
    result
}
