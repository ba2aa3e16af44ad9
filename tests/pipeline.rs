// End-to-end batches over real xlsx fixtures

use bank_normalizer::{
    AlwaysContinue, BatchContext, Cell, ConfigSet, ConfirmPolicy, Decision, FileFingerprint,
    OutputFormat, SaveMode, SheetLocation, Table,
};
use rust_xlsxwriter::Workbook;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ACCOUNT_HEADER: &[&str] = &["客户名称", "账号", "卡号"];
const STATEMENT_HEADER: &[&str] = &["交易卡号", "交易日期", "交易时间", "借贷标志", "交易金额", "账户余额"];

fn write_xlsx(path: &Path, header: &[&str], rows: &[&[&str]]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (c, name) in header.iter().enumerate() {
        sheet.write_string(0, c as u16, *name).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            sheet.write_string((r + 1) as u32, c as u16, *value).unwrap();
        }
    }
    workbook.save(path).unwrap();
}

fn digest(path: &Path) -> String {
    FileFingerprint::read(path, SheetLocation::default())
        .unwrap()
        .digest
}

struct Fixture {
    dir: TempDir,
    accounts: PathBuf,
    statements: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("in")).unwrap();

        let accounts = dir.path().join("in").join("开户信息.xlsx");
        write_xlsx(
            &accounts,
            ACCOUNT_HEADER,
            &[&["张三", "A1", "C1"], &["李四", "A2", "C2"]],
        );

        let statements = dir.path().join("in").join("交易明细.xlsx");
        write_xlsx(
            &statements,
            STATEMENT_HEADER,
            &[
                &["C1", "2024-03-02", "09:30:00", "借", "200", "1300"],
                &["C1", "2024-03-01", "10:00:00", "贷", "500", "1500"],
                &["C2", "2024-03-01", "08:00:00", "贷", "12000", "12000"],
            ],
        );

        Fixture {
            dir,
            accounts,
            statements,
        }
    }

    fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join("in").join(name)
    }

    fn config(&self, statement_rules: Value) -> ConfigSet {
        let document = json!({
            "output_format": "csv",
            "header_hash": {
                (digest(&self.accounts)): ["建设银行", "账户"],
                (digest(&self.statements)): ["建设银行", "流水"]
            },
            "建设银行": {
                "账户": {"姓名": {"客户名称": true}, "账号": true, "卡号": true},
                "流水": statement_rules
            }
        });
        let map: Map<String, Value> = match document {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let config = ConfigSet::from_documents(vec![map]).unwrap();
        assert_eq!(config.output_format, OutputFormat::Csv);
        config
    }

    fn files(&self) -> Vec<PathBuf> {
        // statements first: the accounts-then-statements order must not depend on input order
        vec![self.statements.clone(), self.accounts.clone()]
    }
}

fn statement_rules() -> Value {
    json!({
        "姓名": ["acc", "卡号", "姓名", "卡号"],
        "账号": ["acc", "卡号", "账号", "卡号"],
        "卡号": {"交易卡号": true},
        "日期": ["date", "交易日期"],
        "时间": ["time", "交易时间"],
        "入账金额": ["C", "借贷标志", "贷", "交易金额"],
        "出账金额": ["D", "借贷标志", "借", "交易金额"],
        "余额": {"账户余额": 1}
    })
}

fn read_csv(path: &Path) -> Table {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let columns = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| {
            r.unwrap()
                .iter()
                .map(|v| if v.is_empty() { Cell::Null } else { Cell::text(v) })
                .collect()
        })
        .collect();
    Table::from_rows(columns, rows)
}

#[test]
fn test_accounts_then_statements_enriches_and_splits_by_person() {
    let fx = Fixture::new();
    let mut ctx = BatchContext::new(fx.config(statement_rules()), fx.out()).unwrap();

    let report = ctx.process_accounts_then_statements(&fx.files(), Some("DOC-1"), &mut AlwaysContinue);
    assert!(report.is_clean(), "{}", report.summary());
    assert_eq!(report.files_processed, 2);
    assert_eq!(report.rows_written, 5);

    let accounts = read_csv(&fx.out().join("0银行账户").join("建设银行.csv"));
    assert_eq!(accounts.columns(), &["姓名", "账号", "卡号"]);
    assert_eq!(accounts.len(), 2);

    let zhang = fx
        .out()
        .join("人员流水")
        .join("张三")
        .join("建设银行")
        .join("最大1万,共2条_建设银行_尾号C1.csv");
    let table = read_csv(&zhang);
    assert_eq!(
        table.columns(),
        &["姓名", "账号", "卡号", "日期", "时间", "入账金额", "出账金额", "余额"]
    );
    // sorted by date then time
    assert_eq!(table.get(0, "日期"), Some(&Cell::text("2024-03-01")));
    assert_eq!(table.get(0, "入账金额"), Some(&Cell::text("500")));
    assert_eq!(table.get(0, "出账金额"), Some(&Cell::Null));
    assert_eq!(table.get(1, "出账金额"), Some(&Cell::text("200")));
    assert_eq!(table.get(1, "账号"), Some(&Cell::text("A1")));

    let li = fx
        .out()
        .join("人员流水")
        .join("李四")
        .join("建设银行")
        .join("最大2万,共1条_建设银行_尾号C2.csv");
    assert_eq!(read_csv(&li).len(), 1);

    let log = fs::read_to_string(fx.out().join("0查询文号.csv")).unwrap();
    assert_eq!(log, "DOC-1,建设银行,张三 李四\n");
}

#[test]
fn test_rerun_is_idempotent() {
    let fx = Fixture::new();
    let config = fx.config(statement_rules());

    for _ in 0..2 {
        let mut ctx = BatchContext::new(config.clone(), fx.out()).unwrap();
        let report = ctx.process_accounts_then_statements(&fx.files(), None, &mut AlwaysContinue);
        assert!(report.is_clean(), "{}", report.summary());
    }

    assert_eq!(read_csv(&fx.out().join("0银行账户").join("建设银行.csv")).len(), 2);
    let person_dir = fx.out().join("人员流水").join("张三").join("建设银行");
    let files: Vec<_> = fs::read_dir(&person_dir).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(
        read_csv(&person_dir.join("最大1万,共2条_建设银行_尾号C1.csv")).len(),
        2
    );
}

#[test]
fn test_new_file_mode_keeps_previous_output() {
    let fx = Fixture::new();
    let config = fx.config(statement_rules());

    for _ in 0..2 {
        let mut ctx = BatchContext::new(config.clone(), fx.out())
            .unwrap()
            .with_statement_mode(SaveMode::NewFile);
        ctx.process_accounts_then_statements(&fx.files(), None, &mut AlwaysContinue);
    }

    let person_dir = fx.out().join("人员流水").join("张三").join("建设银行");
    assert!(person_dir.join("最大1万,共2条_建设银行_尾号C1_.csv").exists());
    // account-like files always merge
    assert_eq!(read_csv(&fx.out().join("0银行账户").join("建设银行.csv")).len(), 2);
}

#[test]
fn test_one_by_one_skips_enrichment() {
    let fx = Fixture::new();
    let mut ctx = BatchContext::new(fx.config(statement_rules()), fx.out()).unwrap();

    let report = ctx.process_one_by_one(&fx.files(), None);
    assert!(report.is_clean(), "{}", report.summary());

    // no account join: person and account stay null, all rows in one group
    let dir = fx.out().join("人员流水").join("未知姓名").join("建设银行");
    let table = read_csv(&dir.join("最大2万,共3条_建设银行_尾号C1,C2.csv"));
    assert_eq!(table.len(), 3);
    assert!(table.column("姓名").unwrap().iter().all(|c| c.is_null()));
}

#[test]
fn test_failures_are_recorded_per_file() {
    let fx = Fixture::new();
    let config = fx.config(statement_rules());

    let unknown = fx.path("未知格式.xlsx");
    write_xlsx(&unknown, &["日期", "金额"], &[&["2024-01-01", "1"]]);

    // same header as the registered statements, but an unparseable date
    let bad_date = fx.path("坏日期.xlsx");
    write_xlsx(
        &bad_date,
        STATEMENT_HEADER,
        &[&["C1", "三月一日", "10:00:00", "贷", "1", "1"]],
    );

    let mut files = fx.files();
    files.push(unknown.clone());
    files.push(bad_date.clone());

    let mut ctx = BatchContext::new(config, fx.out()).unwrap();
    let report = ctx.process_accounts_then_statements(&files, None, &mut AlwaysContinue);

    assert_eq!(report.errors.len(), 2, "{}", report.summary());
    assert!(report.errors[&unknown].starts_with("[classification]"));
    assert!(report.errors[&bad_date].starts_with("[validation]"));
    assert!(report.errors[&bad_date].contains("三月一日"));
    assert_eq!(report.files_processed, 2);
}

#[test]
fn test_many_to_one_violation_fails_only_statements() {
    let fx = Fixture::new();
    write_xlsx(
        &fx.accounts,
        ACCOUNT_HEADER,
        &[&["张三", "A1", "C1"], &["张三", "A9", "C1"]],
    );
    let mut ctx = BatchContext::new(fx.config(statement_rules()), fx.out()).unwrap();

    let report = ctx.process_accounts_then_statements(&fx.files(), None, &mut AlwaysContinue);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[&fx.statements].starts_with("[join]"));
    assert!(fx.out().join("0银行账户").join("建设银行.csv").exists());
    assert!(!fx.out().join("人员流水").exists());
}

#[test]
fn test_config_error_is_recorded_for_every_affected_file() {
    let fx = Fixture::new();
    let second = fx.path("交易明细2.xlsx");
    write_xlsx(
        &second,
        STATEMENT_HEADER,
        &[&["C2", "2024-04-01", "08:00:00", "借", "3", "11997"]],
    );

    // lone credit rule
    let mut ctx = BatchContext::new(
        fx.config(json!({"入账金额": ["C", "借贷标志", "贷", "交易金额"]})),
        fx.out(),
    )
    .unwrap();

    let mut files = fx.files();
    files.push(second.clone());
    let report = ctx.process_accounts_then_statements(&files, None, &mut AlwaysContinue);

    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[&fx.statements].starts_with("[config]"));
    assert_eq!(report.errors[&fx.statements], report.errors[&second]);
    assert_eq!(report.files_processed, 1);
}

/// Answers checkpoints from a fixed list and remembers the questions
struct Scripted {
    answers: Vec<Decision>,
    asked: Vec<String>,
}

impl ConfirmPolicy for Scripted {
    fn confirm(&mut self, question: &str) -> Decision {
        self.asked.push(question.to_string());
        if self.answers.is_empty() {
            Decision::Continue
        } else {
            self.answers.remove(0)
        }
    }
}

fn config_from(document: Value) -> ConfigSet {
    let map: Map<String, Value> = match document {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    ConfigSet::from_documents(vec![map]).unwrap()
}

#[test]
fn test_declined_account_checkpoint_skips_only_that_source() {
    let fx = Fixture::new();
    // missing holder name breaks the required 姓名 rule
    write_xlsx(&fx.accounts, ACCOUNT_HEADER, &[&["", "A1", "C1"]]);

    let abc_accounts = fx.path("农行账户.xlsx");
    write_xlsx(&abc_accounts, &["户名", "账号", "卡号"], &[&["王五", "B-1", "B1"]]);
    let abc_customers = fx.path("农行客户.xlsx");
    write_xlsx(&abc_customers, &["户名", "证件号码"], &[&["王五", "110101199001011234"]]);
    let abc_statements = fx.path("农行流水.xlsx");
    write_xlsx(
        &abc_statements,
        &["卡号", "日期", "时间", "借贷", "金额", "余额"],
        &[&["B1", "2024-05-01", "12:00:00", "贷", "300", "300"]],
    );

    let config = config_from(json!({
        "output_format": "csv",
        "header_hash": {
            (digest(&fx.accounts)): ["建设银行", "账户"],
            (digest(&fx.statements)): ["建设银行", "流水"],
            (digest(&abc_accounts)): ["农业银行", "账户"],
            (digest(&abc_customers)): ["农业银行", "客户"],
            (digest(&abc_statements)): ["农业银行", "流水"]
        },
        "建设银行": {
            "账户": {"姓名": {"客户名称": true}, "账号": true, "卡号": true},
            "流水": statement_rules()
        },
        "农业银行": {
            "账户": {"姓名": {"户名": true}, "账号": true, "卡号": true},
            "客户": {"姓名": {"户名": true}, "证件号码": true},
            "流水": {
                "姓名": ["acc", "卡号", "姓名", "卡号"],
                "账号": ["acc", "卡号", "账号", "卡号"],
                "卡号": true,
                "日期": ["date", "日期"],
                "时间": ["time", "时间"],
                "入账金额": ["C", "借贷", "贷", "金额"],
                "出账金额": ["D", "借贷", "借", "金额"],
                "余额": 1
            }
        }
    }));

    let files = vec![
        fx.accounts.clone(),
        fx.statements.clone(),
        abc_statements.clone(),
        abc_accounts.clone(),
        abc_customers.clone(),
    ];
    let mut policy = Scripted {
        answers: vec![Decision::Abort],
        asked: Vec::new(),
    };
    let mut ctx = BatchContext::new(config, fx.out()).unwrap();
    let report = ctx.process_accounts_then_statements(&files, None, &mut policy);

    assert!(!report.aborted);
    assert_eq!(policy.asked.len(), 1);
    assert!(policy.asked[0].contains("建设银行"));

    assert_eq!(report.errors.len(), 2, "{}", report.summary());
    assert!(report.errors[&fx.accounts].starts_with("[validation]"));
    assert!(report.errors[&fx.statements].starts_with("[skipped]"));
    assert_eq!(report.files_processed, 3);

    assert!(!fx.out().join("0银行账户").join("建设银行.csv").exists());
    assert!(!fx.out().join("人员流水").join("张三").exists());

    assert!(fx.out().join("0银行账户").join("农业银行.csv").exists());
    let customers = read_csv(&fx.out().join("0客户信息").join("农业银行.csv"));
    assert_eq!(customers.columns(), &["姓名", "证件号码"]);
    assert_eq!(customers.get(0, "证件号码"), Some(&Cell::text("110101199001011234")));

    let statement = read_csv(
        &fx.out()
            .join("人员流水")
            .join("王五")
            .join("农业银行")
            .join("最大1万,共1条_农业银行_尾号B1.csv"),
    );
    assert_eq!(statement.get(0, "账号"), Some(&Cell::text("B-1")));
    assert_eq!(statement.get(0, "入账金额"), Some(&Cell::text("300")));
}

#[test]
fn test_header_below_title_row_end_to_end() {
    let fx = Fixture::new();
    let titled = fx.path("带标题流水.xlsx");
    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "建设银行个人活期明细").unwrap();
        for (c, name) in STATEMENT_HEADER.iter().enumerate() {
            sheet.write_string(1, c as u16, *name).unwrap();
        }
        for (c, value) in ["C9", "2024-06-01", "09:00:00", "贷", "10", "10"].iter().enumerate() {
            sheet.write_string(2, c as u16, *value).unwrap();
        }
    }
    workbook.save(&titled).unwrap();

    let location = SheetLocation {
        header_row: 1,
        ..SheetLocation::default()
    };
    let digest = FileFingerprint::read(&titled, location).unwrap().digest;
    let config = config_from(json!({
        "output_format": "csv",
        "header_hash": {(digest): ["建设银行", "流水"]},
        "建设银行": {"流水": statement_rules()}
    }));

    let mut default_ctx = BatchContext::new(config.clone(), fx.out()).unwrap();
    let report = default_ctx.process_one_by_one(&[titled.clone()], None);
    assert!(report.errors[&titled].starts_with("[classification]"));

    let mut ctx = BatchContext::new(config, fx.out()).unwrap().with_location(location);
    let report = ctx.process_one_by_one(&[titled.clone()], None);
    assert!(report.is_clean(), "{}", report.summary());

    let dir = fx.out().join("人员流水").join("未知姓名").join("建设银行");
    assert_eq!(read_csv(&dir.join("最大1万,共1条_建设银行_尾号C9.csv")).len(), 1);
}
