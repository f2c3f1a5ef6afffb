use codejudge_api::{
    config::JudgeConfig,
    judge::{Judge, JudgeRequest},
    models::{problem::TestCase, Language, Verdict},
};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

async fn judge() -> Judge {
    let config = JudgeConfig {
        temp_dir: std::env::temp_dir().join("codejudge-tests"),
        ..JudgeConfig::default()
    };
    tokio::fs::create_dir_all(&config.temp_dir).await.unwrap();
    Judge::with_process_sandbox(config)
}

fn case(input: &str, expected: &str) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected.to_string(),
        explanation: None,
        is_hidden: false,
    }
}

fn python(judge: &Judge, code: &str, cases: Vec<TestCase>) -> JudgeRequest {
    JudgeRequest {
        language: Language::Python,
        code: code.to_string(),
        test_cases: cases,
        limits: judge.limits(1000, 128),
        check_output: true,
    }
}

#[tokio::test]
async fn python_solution_is_accepted() {
    if !python_available() {
        eprintln!("python3 not installed, skipping");
        return;
    }
    let judge = judge().await;
    let code = "a, b = map(int, input().split())\nprint(a + b)\n";

    let report = judge
        .judge(python(&judge, code, vec![case("1 2", "3"), case("5 5", "10")]))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(report.test_cases_passed, 2);
    assert_eq!(report.results.len(), 2);
}

#[tokio::test]
async fn wrong_answers_do_not_stop_judging() {
    if !python_available() {
        return;
    }
    let judge = judge().await;

    let report = judge
        .judge(python(
            &judge,
            "print(0)\n",
            vec![case("", "0"), case("", "1"), case("", "0")],
        ))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::WrongAnswer);
    assert_eq!(report.test_cases_passed, 2);
    assert_eq!(report.results.len(), 3);
    assert!(!report.results[1].passed);
    assert_eq!(report.results[1].test_case_index, 1);
}

#[tokio::test]
async fn infinite_loop_hits_time_limit() {
    if !python_available() {
        return;
    }
    let judge = judge().await;

    let report = judge
        .judge(python(&judge, "while True:\n    pass\n", vec![case("", "")]))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
}

#[tokio::test]
async fn crash_is_a_runtime_error() {
    if !python_available() {
        return;
    }
    let judge = judge().await;

    let report = judge
        .judge(python(&judge, "raise SystemExit(3)\n", vec![case("", "")]))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::RuntimeError);
    assert_eq!(report.test_cases_passed, 0);
}
