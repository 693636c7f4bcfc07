// Kept in sync by hand with `DbContext::init_schema`.

diesel::table! {
    documents (id) {
        id -> Text,
        content_hash -> Text,
        filename -> Text,
        content_type -> Text,
        size_bytes -> BigInt,
        storage_path -> Text,
        page_count -> Nullable<Integer>,
        extracted_text -> Nullable<Text>,
        ocr_engine -> Nullable<Text>,
        ocr_confidence -> Nullable<Double>,
        pages_parsed -> Nullable<Integer>,
        word_count -> Nullable<Integer>,
        processing_status -> Text,
        processing_error -> Nullable<Text>,
        processed_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    ocr_runs (id) {
        id -> Text,
        document_id -> Text,
        ocr_engine -> Text,
        engine_version -> Nullable<Text>,
        ocr_config -> Text,
        status -> Text,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
        confidence_mean -> Nullable<Double>,
        pages_parsed -> Nullable<Integer>,
        word_count -> Nullable<Integer>,
        table_count -> Nullable<Integer>,
        latency_ms -> Nullable<BigInt>,
        cost_cents -> Nullable<Integer>,
        raw_response_path -> Nullable<Text>,
        created_at -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    document_pages (id) {
        id -> Integer,
        document_id -> Text,
        ocr_run_id -> Text,
        page_number -> Integer,
        text_content -> Text,
        word_count -> Integer,
        confidence_score -> Nullable<Double>,
        created_at -> Text,
    }
}

diesel::table! {
    dead_letters (id) {
        id -> Integer,
        operation -> Text,
        correlation_id -> Text,
        payload -> Text,
        error -> Text,
        created_at -> Text,
    }
}

diesel::joinable!(ocr_runs -> documents (document_id));
diesel::joinable!(document_pages -> ocr_runs (ocr_run_id));

diesel::allow_tables_to_appear_in_same_query!(documents, ocr_runs, document_pages, dead_letters,);
