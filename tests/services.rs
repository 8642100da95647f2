use learnlab::auth::{self, PasswordChangeRequest, PasswordResetConfirm, SessionCache};
use learnlab::cards::{self, CardUpdate, NewCard};
use learnlab::lessons::{self, LessonUpdate, NewLesson};
use learnlab::media;
use learnlab::models::{CardContent, Id, Role, SandboxWidget};
use learnlab::profile::{self, ProfileUpdate};
use learnlab::progress;
use learnlab::quiz::{self, NewAnswer, NewQuestion, TestSubmission};
use learnlab::tasks::{self, NewTask, Review};
use learnlab::tracker;
use learnlab::{ServiceError, Store};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

fn lesson(store: &Store, title: &str, published: bool) -> Id {
    lessons::create_lesson(
        store,
        NewLesson {
            title: title.to_string(),
            description: format!("All about {}", title.to_lowercase()),
            published,
        },
    )
    .unwrap()
    .id
}

fn educational(store: &Store, lesson_id: Id, title: &str) -> Id {
    cards::create_card(
        store,
        lesson_id,
        NewCard {
            title: title.to_string(),
            content: CardContent::Educational {
                body: "Read this".to_string(),
                media: Vec::new(),
            },
        },
    )
    .unwrap()
    .id
}

fn test_card(store: &Store, lesson_id: Id) -> Id {
    cards::create_card(
        store,
        lesson_id,
        NewCard {
            title: "Quiz".to_string(),
            content: CardContent::Test { pass_percent: 50 },
        },
    )
    .unwrap()
    .id
}

fn answers(correct: &[bool]) -> Vec<NewAnswer> {
    correct
        .iter()
        .enumerate()
        .map(|(i, c)| NewAnswer {
            text: format!("answer {}", i),
            correct: *c,
        })
        .collect()
}

#[test]
fn first_account_is_admin_and_duplicates_conflict() {
    let store = Store::in_memory();
    let admin = auth::register(&store, "instructor", "instructor@example.com", "secret1").unwrap();
    let student = auth::register(&store, "pupil", "Pupil@Example.com", "secret2").unwrap();

    assert_eq!(admin.role, Role::Admin);
    assert_eq!(student.role, Role::Student);
    assert_eq!(student.email, "pupil@example.com");

    let dup = auth::register(&store, "PUPIL", "other@example.com", "secret3");
    assert!(matches!(dup, Err(ServiceError::Conflict(_))));

    // The only admin cannot step down.
    assert!(matches!(
        auth::set_role(&store, admin.id, Role::Student),
        Err(ServiceError::Conflict(_))
    ));
}

#[test]
fn unpublished_lessons_are_hidden_from_students() {
    let store = Store::in_memory();
    let draft = lesson(&store, "Draft", false);
    let live = lesson(&store, "Live", true);

    let seen: Vec<Id> = lessons::list_lessons(&store, Role::Student)
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(seen, vec![live]);
    assert_eq!(lessons::list_lessons(&store, Role::Admin).len(), 2);

    assert!(matches!(
        lessons::get_lesson(&store, draft, Role::Student),
        Err(ServiceError::NotFound("lesson"))
    ));

    lessons::update_lesson(
        &store,
        draft,
        LessonUpdate {
            published: Some(true),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(lessons::get_lesson(&store, draft, Role::Student).is_ok());
}

#[test]
fn cards_keep_dense_positions() {
    let store = Store::in_memory();
    let dir = TempDir::new().unwrap();
    let lesson_id = lesson(&store, "Order", true);
    let a = educational(&store, lesson_id, "a");
    let b = educational(&store, lesson_id, "b");
    let c = educational(&store, lesson_id, "c");

    let reordered = cards::reorder_cards(&store, lesson_id, &[c, a, b]).unwrap();
    let ids: Vec<Id> = reordered.iter().map(|card| card.id).collect();
    assert_eq!(ids, vec![c, a, b]);

    assert!(cards::reorder_cards(&store, lesson_id, &[c, a]).is_err());
    assert!(cards::reorder_cards(&store, lesson_id, &[c, a, a]).is_err());

    cards::delete_card(&store, dir.path(), a).unwrap();
    let positions: Vec<(Id, u32)> = cards::list_cards(&store, lesson_id, Role::Admin)
        .unwrap()
        .iter()
        .map(|card| (card.id, card.position))
        .collect();
    assert_eq!(positions, vec![(c, 0), (b, 1)]);
}

#[test]
fn tests_are_graded_on_exact_answer_sets() {
    let store = Store::in_memory();
    let lesson_id = lesson(&store, "Quiz", true);
    let card_id = test_card(&store, lesson_id);

    let single = quiz::create_question(
        &store,
        card_id,
        NewQuestion {
            text: "Pick one".to_string(),
            multiple: false,
            answers: answers(&[false, true, false]),
        },
    )
    .unwrap();
    let multi = quiz::create_question(
        &store,
        card_id,
        NewQuestion {
            text: "Pick two".to_string(),
            multiple: true,
            answers: answers(&[true, true, false]),
        },
    )
    .unwrap();

    // Students never see which answers are right.
    let hidden = quiz::list_questions(&store, card_id, Role::Student, false).unwrap();
    assert!(hidden.iter().flat_map(|q| &q.answers).all(|a| a.correct.is_none()));

    let mut selections = BTreeMap::new();
    selections.insert(single.id, vec![single.answers[1].id]);
    selections.insert(multi.id, vec![multi.answers[0].id]);
    let result = quiz::submit_test(
        &store,
        42,
        card_id,
        Role::Student,
        &TestSubmission { answers: selections },
    )
    .unwrap();

    assert_eq!(result.score, 1);
    assert_eq!(result.max_score, 2);
    assert_eq!(result.percent, 50.0);
    assert!(result.passed);

    let progress = progress::lesson_progress(&store, 42, lesson_id, Role::Student).unwrap();
    assert_eq!(progress.completed_cards, 1);
    assert_eq!((progress.score, progress.max_score), (1, 2));
}

#[test]
fn single_choice_questions_need_exactly_one_correct_answer() {
    let form = NewQuestion {
        text: "Which?".to_string(),
        multiple: false,
        answers: answers(&[true, true]),
    };
    assert!(quiz::check_question(&form).is_err());

    let form = NewQuestion {
        answers: answers(&[false, false]),
        multiple: true,
        ..form
    };
    assert!(quiz::check_question(&form).is_err());
}

#[test]
fn csv_import_is_all_or_nothing() {
    let store = Store::in_memory();
    let lesson_id = lesson(&store, "Import", true);
    let card_id = test_card(&store, lesson_id);

    let bad = "Good?,*yes,no\nBroken?,only one answer\n";
    assert!(quiz::import_questions(&store, card_id, bad).is_err());
    assert!(quiz::list_questions(&store, card_id, Role::Admin, true).unwrap().is_empty());

    let good = "# bank\nGood?,*yes,no\n\"Primes, all\",*2,*3,4\n";
    let created = quiz::import_questions(&store, card_id, good).unwrap();
    assert_eq!(created.len(), 2);
    assert!(created[1].multiple);
}

#[test]
fn changing_card_kind_drops_questions() {
    let store = Store::in_memory();
    let dir = TempDir::new().unwrap();
    let lesson_id = lesson(&store, "Kinds", true);
    let card_id = test_card(&store, lesson_id);
    quiz::create_question(
        &store,
        card_id,
        NewQuestion {
            text: "Soon gone".to_string(),
            multiple: false,
            answers: answers(&[true, false]),
        },
    )
    .unwrap();

    cards::update_card(
        &store,
        dir.path(),
        card_id,
        CardUpdate {
            title: None,
            content: Some(CardContent::Sandbox {
                widget: SandboxWidget::Shapes { shapes: Vec::new() },
            }),
        },
    )
    .unwrap();

    assert!(store.read(|db| db.questions_of(card_id).is_empty()));
    assert!(quiz::list_questions(&store, card_id, Role::Admin, true).is_err());
}

#[test]
fn resubmission_replaces_pending_work_only() {
    let store = Store::in_memory();
    let lesson_id = lesson(&store, "Tasks", true);
    let task = tasks::create_task(
        &store,
        lesson_id,
        NewTask {
            title: "Draw a fern".to_string(),
            description: String::new(),
            max_points: 5,
        },
    )
    .unwrap();

    let first = tasks::submit_task(&store, 7, task.id, Role::Student, "v1").unwrap();
    let second = tasks::submit_task(&store, 7, task.id, Role::Student, "v2").unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.content, "v2");

    assert!(
        tasks::review_submission(
            &store,
            second.id,
            Review {
                score: 6,
                feedback: None
            }
        )
        .is_err()
    );
    let reviewed = tasks::review_submission(
        &store,
        second.id,
        Review {
            score: 4,
            feedback: Some("Nice".to_string()),
        },
    )
    .unwrap();
    assert_eq!(reviewed.score, Some(4));

    let third = tasks::submit_task(&store, 7, task.id, Role::Student, "v3").unwrap();
    assert_ne!(third.id, second.id);

    tasks::submit_task(&store, 8, task.id, Role::Student, "other").unwrap();
    assert_eq!(
        tasks::list_submissions(&store, task.id, 7, Role::Student).unwrap().len(),
        2
    );
    assert_eq!(
        tasks::list_submissions(&store, task.id, 1, Role::Admin).unwrap().len(),
        3
    );
}

#[test]
fn tracker_accumulates_bounded_flushes() {
    let store = Store::in_memory();
    let lesson_id = lesson(&store, "Time", true);

    assert_eq!(tracker::record(&store, 3, lesson_id, Role::Student, 30).unwrap(), 30);
    assert_eq!(tracker::record(&store, 3, lesson_id, Role::Student, 45).unwrap(), 75);
    assert!(tracker::record(&store, 3, lesson_id, Role::Student, 0).is_err());
    assert!(tracker::record(&store, 3, lesson_id, Role::Student, 3601).is_err());

    let trackers = tracker::list(&store, 3);
    assert_eq!(trackers.len(), 1);
    assert_eq!(trackers[0].seconds, 75);
    assert!(tracker::list(&store, 4).is_empty());
}

#[test]
fn completing_cards_is_idempotent() {
    let store = Store::in_memory();
    let lesson_id = lesson(&store, "Steps", true);
    let a = educational(&store, lesson_id, "a");
    educational(&store, lesson_id, "b");

    progress::complete_card(&store, 5, a, Role::Student).unwrap();
    let p = progress::complete_card(&store, 5, a, Role::Student).unwrap();
    assert_eq!(p.completed_cards, 1);
    assert_eq!(p.total_cards, 2);
    assert_eq!(p.percent, 50.0);
}

#[test]
fn recommendations_follow_interests() {
    let store = Store::in_memory();
    let user = auth::register(&store, "learner", "learner@example.com", "secret1").unwrap();
    let colors = lesson(&store, "Colors", true);
    let fractals = lesson(&store, "Fractals", true);
    lesson(&store, "Hidden fractals", false);

    let profile = profile::update_profile(
        &store,
        user.id,
        ProfileUpdate {
            interests: Some(vec!["Fractals".to_string(), " fractals ".to_string()]),
            avatar_color: Some("#ABC".to_string()),
            theme: Some("dark".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(profile.interests, vec!["fractals"]);
    assert_eq!(profile.avatar_color.as_deref(), Some("#aabbcc"));

    let picks = profile::recommend_lessons(&store, user.id).unwrap();
    let ids: Vec<Id> = picks.iter().map(|r| r.lesson.id).collect();
    assert_eq!(ids, vec![fractals, colors]);

    let bad_theme = profile::update_profile(
        &store,
        user.id,
        ProfileUpdate {
            theme: Some("neon".to_string()),
            ..Default::default()
        },
    );
    assert!(bad_theme.is_err());
}

#[test]
fn media_lives_on_disk_and_follows_its_card() {
    let store = Store::in_memory();
    let dir = TempDir::new().unwrap();
    let lesson_id = lesson(&store, "Media", true);
    let card_id = educational(&store, lesson_id, "with picture");

    let file = media::store_media(&store, dir.path(), card_id, "cat.png", "image/png", b"PNGDATA").unwrap();
    let card = cards::get_card(&store, card_id, Role::Student).unwrap();
    assert_eq!(
        card.content,
        CardContent::Educational {
            body: "Read this".to_string(),
            media: vec![file.id],
        }
    );

    let (meta, bytes) = media::load_media(&store, dir.path(), file.id, Role::Student).unwrap();
    assert_eq!(meta.file_name, "cat.png");
    assert_eq!(bytes, b"PNGDATA");

    let too_big = vec![0u8; media::MAX_MEDIA_BYTES + 1];
    assert!(matches!(
        media::store_media(&store, dir.path(), card_id, "big.bin", "", &too_big),
        Err(ServiceError::TooLarge)
    ));

    lessons::delete_lesson(&store, dir.path(), lesson_id).unwrap();
    assert!(!dir.path().join(&file.stored_as).exists());
    assert!(store.read(|db| db.media.is_empty()));
}

#[test]
fn snapshot_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("learnlab.bin.gz");

    let lesson_id = {
        let store = Store::open(&path).unwrap();
        let id = lesson(&store, "Persistent", true);
        tracker::record(&store, 9, id, Role::Student, 120).unwrap();
        id
    };

    let store = Store::open(&path).unwrap();
    let view = lessons::get_lesson(&store, lesson_id, Role::Student).unwrap();
    assert_eq!(view.lesson.title, "Persistent");
    assert_eq!(tracker::list(&store, 9)[0].seconds, 120);

    // Ids keep counting from where the previous run stopped.
    let next = lesson(&store, "Next", true);
    assert!(next > lesson_id);
}

fn single_choice(store: &Store, card_id: Id, text: &str) -> quiz::QuestionView {
    quiz::create_question(
        store,
        card_id,
        NewQuestion {
            text: text.to_string(),
            multiple: false,
            answers: answers(&[true, false]),
        },
    )
    .unwrap()
}

fn submit(store: &Store, user_id: Id, card_id: Id, picks: &[(Id, Id)]) -> quiz::TestResult {
    let answers = picks.iter().map(|(q, a)| (*q, vec![*a])).collect();
    quiz::submit_test(store, user_id, card_id, Role::Student, &TestSubmission { answers }).unwrap()
}

#[test]
fn scores_are_capped_per_card() {
    let store = Store::in_memory();
    let lesson_id = lesson(&store, "Scores", true);
    let first = test_card(&store, lesson_id);
    let second = test_card(&store, lesson_id);

    let q1 = single_choice(&store, first, "one");
    let q2 = single_choice(&store, first, "two");
    let q3 = single_choice(&store, second, "three");

    let full = submit(&store, 4, first, &[(q1.id, q1.answers[0].id), (q2.id, q2.answers[0].id)]);
    assert_eq!(full.score, 2);
    let failed = submit(&store, 4, second, &[(q3.id, q3.answers[1].id)]);
    assert_eq!(failed.score, 0);

    // The 2/2 attempt now outscores the single question left on its card.
    quiz::delete_question(&store, q2.id).unwrap();

    let progress = progress::lesson_progress(&store, 4, lesson_id, Role::Student).unwrap();
    assert_eq!((progress.score, progress.max_score), (1, 2));
}

#[test]
fn failed_snapshot_leaves_the_store_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("learnlab.bin.gz");
    let store = Store::open(&path).unwrap();

    // A directory where the temporary snapshot goes makes every save fail.
    let blocker = dir.path().join("learnlab.bin.tmp");
    std::fs::create_dir(&blocker).unwrap();

    let failed = auth::register(&store, "alice", "alice@example.com", "secret1");
    assert!(matches!(failed, Err(ServiceError::Storage(_))));
    assert!(store.read(|db| db.users.is_empty()));
    assert!(!path.exists());

    std::fs::remove_dir(&blocker).unwrap();
    let alice = auth::register(&store, "alice", "alice@example.com", "secret1").unwrap();
    assert_eq!(alice.role, Role::Admin);
    assert!(!blocker.exists());

    let reopened = Store::open(&path).unwrap();
    assert_eq!(reopened.read(|db| db.users.len()), 1);
}

#[test]
fn deleting_a_lesson_under_load_leaves_no_orphans() {
    let dir = TempDir::new().unwrap();
    let media_dir = dir.path().join("media");

    for _ in 0..25 {
        let store = Store::in_memory();
        let lesson_id = lesson(&store, "Busy", true);
        let card_id = educational(&store, lesson_id, "page");
        let task = tasks::create_task(
            &store,
            lesson_id,
            NewTask {
                title: "Essay".to_string(),
                description: String::new(),
                max_points: 10,
            },
        )
        .unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                let _ = progress::complete_card(&store, 2, card_id, Role::Student);
            });
            s.spawn(|| {
                let _ = tasks::submit_task(&store, 2, task.id, Role::Student, "done");
            });
            s.spawn(|| {
                let _ = tracker::record(&store, 2, lesson_id, Role::Student, 10);
            });
            s.spawn(|| lessons::delete_lesson(&store, &media_dir, lesson_id).unwrap());
        });

        store.read(|db| {
            assert!(db.completions.is_empty());
            assert!(db.submissions.is_empty());
            assert!(db.trackers.is_empty());
        });
    }
}

#[test]
fn password_reset_replaces_the_password_and_ends_sessions() {
    let store = Store::in_memory();
    let sessions = SessionCache::new(Duration::from_secs(3600));
    let user = auth::register(&store, "forgetful", "forgetful@example.com", "secret1").unwrap();
    let token = auth::login(&store, &sessions, "forgetful", "secret1").unwrap().token;
    let other = sessions.create(user.id);

    assert!(matches!(
        auth::request_password_reset(&store, "nobody@example.com"),
        Err(ServiceError::NotFound(_))
    ));
    let code = auth::request_password_reset(&store, " Forgetful@Example.com ").unwrap();
    assert_eq!(code.len(), 8);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let confirm = |reset_code: &str| PasswordResetConfirm {
        email: "forgetful@example.com".to_string(),
        reset_code: reset_code.to_string(),
        new_password: "newsecret".to_string(),
    };

    let wrong = if code == "AAAAAAAA" { "BBBBBBBB" } else { "AAAAAAAA" };
    assert!(matches!(
        auth::reset_password(&store, &sessions, &confirm(wrong)),
        Err(ServiceError::Validation(_))
    ));
    assert!(sessions.validate(&token).is_some());

    // Codes are compared case-insensitively.
    auth::reset_password(&store, &sessions, &confirm(&code.to_lowercase())).unwrap();
    assert!(sessions.validate(&token).is_none());
    assert!(sessions.validate(&other).is_none());

    assert!(matches!(
        auth::login(&store, &sessions, "forgetful", "secret1"),
        Err(ServiceError::InvalidCredentials)
    ));
    auth::login(&store, &sessions, "forgetful@example.com", "newsecret").unwrap();

    // A code works once.
    assert!(auth::reset_password(&store, &sessions, &confirm(&code)).is_err());
}

#[test]
fn expired_reset_codes_are_rejected() {
    let store = Store::in_memory();
    let sessions = SessionCache::new(Duration::from_secs(3600));
    let user = auth::register(&store, "late", "late@example.com", "secret1").unwrap();
    let code = auth::request_password_reset(&store, "late@example.com").unwrap();

    store
        .write(|db| {
            let user = db.users.get_mut(&user.id).unwrap();
            user.reset_code_expires = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
            Ok(())
        })
        .unwrap();

    let result = auth::reset_password(
        &store,
        &sessions,
        &PasswordResetConfirm {
            email: "late@example.com".to_string(),
            reset_code: code,
            new_password: "newsecret".to_string(),
        },
    );
    assert!(matches!(result, Err(ServiceError::Validation(msg)) if msg.contains("expired")));
    auth::login(&store, &sessions, "late", "secret1").unwrap();
}

#[test]
fn changing_password_checks_old_and_confirmation() {
    let store = Store::in_memory();
    let sessions = SessionCache::new(Duration::from_secs(3600));
    let user = auth::register(&store, "careful", "careful@example.com", "secret1").unwrap();

    let change = |old: &str, new: &str, confirm: &str| PasswordChangeRequest {
        old_password: old.to_string(),
        new_password: new.to_string(),
        confirm_password: confirm.to_string(),
    };

    assert!(matches!(
        auth::change_password(&store, user.id, &change("secret1", "another1", "another2")),
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        auth::change_password(&store, user.id, &change("wrong12", "another1", "another1")),
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        auth::change_password(&store, user.id, &change("secret1", "short", "short")),
        Err(ServiceError::Validation(_))
    ));

    auth::change_password(&store, user.id, &change("secret1", "another1", "another1")).unwrap();
    assert!(auth::login(&store, &sessions, "careful", "secret1").is_err());
    auth::login(&store, &sessions, "careful", "another1").unwrap();
}
